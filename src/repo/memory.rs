//! In-process, in-memory repository implementations. Suitable for tests
//! and small deployments; not durable across restarts.

use super::{CharacteristicRepo, RawSample, RepoError, SampleRepo, ViolationRepo, ViolationStats};
use crate::types::{
    Characteristic, CharacteristicId, RuleConfig, Sample, SampleId, SubgroupMode, Violation, ViolationId,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

pub struct InMemorySampleRepo {
    samples: RwLock<Vec<Sample>>,
    next_id: AtomicI64,
}

impl InMemorySampleRepo {
    pub fn new() -> Self {
        Self {
            samples: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Test/seed helper: build and insert a minimal sample directly from
    /// raw measurement values, bypassing the pipeline.
    pub async fn seed_raw(&self, char_id: CharacteristicId, values: Vec<f64>) -> SampleId {
        let (mean, range, actual_n) = Sample::summarize(&values);
        let id = SampleId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let sample = Sample {
            id,
            characteristic_id: char_id,
            timestamp: Utc::now(),
            measurements: values,
            mean,
            range,
            actual_n,
            is_undersized: false,
            batch: None,
            operator: None,
            zone: crate::types::Zone::ZoneCUpper,
            z_score: None,
            effective_ucl: None,
            effective_lcl: None,
            excluded: false,
            exclude_reason: None,
        };
        self.samples.write().unwrap().push(sample);
        id
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Sample>>, RepoError> {
        self.samples
            .write()
            .map_err(|e| RepoError::Backend(e.to_string()))
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Sample>>, RepoError> {
        self.samples
            .read()
            .map_err(|e| RepoError::Backend(e.to_string()))
    }
}

impl Default for InMemorySampleRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleRepo for InMemorySampleRepo {
    async fn insert(&self, sample: Sample) -> Result<(), RepoError> {
        self.write_lock()?.push(sample);
        Ok(())
    }

    async fn raw_history(&self, char_id: CharacteristicId) -> Result<Vec<RawSample>, RepoError> {
        Ok(self
            .read_lock()?
            .iter()
            .filter(|s| s.characteristic_id == char_id)
            .map(|s| RawSample {
                sample_id: s.id,
                timestamp: s.timestamp,
                values: s.measurements.clone(),
                mean: s.mean,
                range: s.range,
                actual_n: s.actual_n,
                excluded: s.excluded,
            })
            .collect())
    }

    async fn get(&self, sample_id: SampleId) -> Result<Option<Sample>, RepoError> {
        Ok(self.read_lock()?.iter().find(|s| s.id == sample_id).cloned())
    }

    async fn list_batch(
        &self,
        char_id: CharacteristicId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Sample>, RepoError> {
        Ok(self
            .read_lock()?
            .iter()
            .filter(|s| s.characteristic_id == char_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_excluded(&self, sample_id: SampleId, reason: String) -> Result<(), RepoError> {
        let mut guard = self.write_lock()?;
        let sample = guard.iter_mut().find(|s| s.id == sample_id).ok_or(RepoError::NotFound)?;
        sample.excluded = true;
        sample.exclude_reason = Some(reason);
        Ok(())
    }

    async fn set_z_score(&self, sample_id: SampleId, z_score: f64) -> Result<(), RepoError> {
        let mut guard = self.write_lock()?;
        let sample = guard.iter_mut().find(|s| s.id == sample_id).ok_or(RepoError::NotFound)?;
        sample.z_score = Some(z_score);
        sample.effective_ucl = None;
        sample.effective_lcl = None;
        Ok(())
    }

    async fn set_effective_limits(&self, sample_id: SampleId, ucl: f64, lcl: f64) -> Result<(), RepoError> {
        let mut guard = self.write_lock()?;
        let sample = guard.iter_mut().find(|s| s.id == sample_id).ok_or(RepoError::NotFound)?;
        sample.effective_ucl = Some(ucl);
        sample.effective_lcl = Some(lcl);
        sample.z_score = None;
        Ok(())
    }

    async fn clear_derived_fields(&self, sample_id: SampleId) -> Result<(), RepoError> {
        let mut guard = self.write_lock()?;
        let sample = guard.iter_mut().find(|s| s.id == sample_id).ok_or(RepoError::NotFound)?;
        sample.z_score = None;
        sample.effective_ucl = None;
        sample.effective_lcl = None;
        Ok(())
    }
}

pub struct InMemoryCharacteristicRepo {
    characteristics: RwLock<Vec<Characteristic>>,
}

impl InMemoryCharacteristicRepo {
    pub fn new() -> Self {
        Self {
            characteristics: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryCharacteristicRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CharacteristicRepo for InMemoryCharacteristicRepo {
    async fn insert(&self, characteristic: Characteristic) -> Result<(), RepoError> {
        self.characteristics
            .write()
            .map_err(|e| RepoError::Backend(e.to_string()))?
            .push(characteristic);
        Ok(())
    }

    async fn get(&self, char_id: CharacteristicId) -> Result<Option<Characteristic>, RepoError> {
        Ok(self
            .characteristics
            .read()
            .map_err(|e| RepoError::Backend(e.to_string()))?
            .iter()
            .find(|c| c.id == char_id)
            .cloned())
    }

    async fn update_limits(
        &self,
        char_id: CharacteristicId,
        center_line: f64,
        sigma: f64,
        ucl: f64,
        lcl: f64,
    ) -> Result<(), RepoError> {
        let mut guard = self
            .characteristics
            .write()
            .map_err(|e| RepoError::Backend(e.to_string()))?;
        let characteristic = guard.iter_mut().find(|c| c.id == char_id).ok_or(RepoError::NotFound)?;
        characteristic.stored_center_line = Some(center_line);
        characteristic.stored_sigma = Some(sigma);
        characteristic.ucl = Some(ucl);
        characteristic.lcl = Some(lcl);
        Ok(())
    }

    async fn update_subgroup_mode(&self, char_id: CharacteristicId, mode: SubgroupMode) -> Result<(), RepoError> {
        let mut guard = self
            .characteristics
            .write()
            .map_err(|e| RepoError::Backend(e.to_string()))?;
        let characteristic = guard.iter_mut().find(|c| c.id == char_id).ok_or(RepoError::NotFound)?;
        characteristic.subgroup_mode = mode;
        Ok(())
    }

    async fn update_rule_config(
        &self,
        char_id: CharacteristicId,
        rule_id: u8,
        is_enabled: bool,
        require_acknowledgement: bool,
    ) -> Result<(), RepoError> {
        let mut guard = self
            .characteristics
            .write()
            .map_err(|e| RepoError::Backend(e.to_string()))?;
        let characteristic = guard.iter_mut().find(|c| c.id == char_id).ok_or(RepoError::NotFound)?;
        characteristic.rules.insert(
            rule_id,
            RuleConfig {
                is_enabled,
                require_acknowledgement,
            },
        );
        Ok(())
    }
}

pub struct InMemoryViolationRepo {
    violations: RwLock<Vec<Violation>>,
}

impl InMemoryViolationRepo {
    pub fn new() -> Self {
        Self {
            violations: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryViolationRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ViolationRepo for InMemoryViolationRepo {
    async fn insert(&self, violation: Violation) -> Result<(), RepoError> {
        self.violations
            .write()
            .map_err(|e| RepoError::Backend(e.to_string()))?
            .push(violation);
        Ok(())
    }

    async fn list_unacknowledged(&self, char_id: CharacteristicId) -> Result<Vec<Violation>, RepoError> {
        Ok(self
            .violations
            .read()
            .map_err(|e| RepoError::Backend(e.to_string()))?
            .iter()
            .filter(|v| v.characteristic_id == char_id && !v.acknowledged)
            .cloned()
            .collect())
    }

    async fn acknowledge(
        &self,
        violation_id: ViolationId,
        acknowledged_by: String,
        reason: String,
    ) -> Result<Violation, RepoError> {
        let mut guard = self
            .violations
            .write()
            .map_err(|e| RepoError::Backend(e.to_string()))?;
        let violation = guard
            .iter_mut()
            .find(|v| v.id == violation_id)
            .ok_or(RepoError::NotFound)?;
        if violation.acknowledged {
            return Err(RepoError::Conflict(format!("violation {violation_id:?} already acknowledged")));
        }
        violation.acknowledged = true;
        violation.acknowledged_by = Some(acknowledged_by);
        violation.acknowledged_at = Some(Utc::now());
        violation.acknowledged_reason = Some(reason);
        Ok(violation.clone())
    }

    async fn count_unacknowledged(&self, char_id: CharacteristicId) -> Result<usize, RepoError> {
        Ok(self.list_unacknowledged(char_id).await?.len())
    }

    async fn stats(&self, char_id: CharacteristicId) -> Result<ViolationStats, RepoError> {
        let guard = self
            .violations
            .read()
            .map_err(|e| RepoError::Backend(e.to_string()))?;
        let mut stats = ViolationStats::default();
        for v in guard.iter().filter(|v| v.characteristic_id == char_id) {
            stats.total += 1;
            if v.acknowledged {
                stats.acknowledged += 1;
            } else {
                stats.unacknowledged += 1;
            }
            match v.severity {
                crate::types::Severity::Critical => stats.critical += 1,
                crate::types::Severity::Warning => stats.warning += 1,
            }
        }
        Ok(stats)
    }
}
