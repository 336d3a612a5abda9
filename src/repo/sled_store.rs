//! Durable, sled-backed repository implementations.
//!
//! Samples and violations are stored as JSON-serialized values keyed by a
//! big-endian-encoded id, which keeps sled's natural byte-order iteration
//! in ascending id (and therefore roughly chronological) order. Writes are
//! not flushed individually — sled batches its own durability, and forcing
//! a flush on every sample would make high-frequency tag intake
//! unacceptably slow; the tradeoff is that the last few writes before an
//! unclean shutdown may be lost.

use super::{CharacteristicRepo, RawSample, RepoError, SampleRepo, ViolationRepo, ViolationStats};
use crate::types::{
    Characteristic, CharacteristicId, RuleConfig, Sample, SampleId, SubgroupMode, Violation, ViolationId,
};
use async_trait::async_trait;
use chrono::Utc;
use sled::Tree;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

fn encode_key(id: i64) -> [u8; 8] {
    id.to_be_bytes()
}

fn ser<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, RepoError> {
    serde_json::to_vec(value).map_err(|e| RepoError::Serialization(e.to_string()))
}

fn de<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, RepoError> {
    serde_json::from_slice(bytes).map_err(|e| RepoError::Serialization(e.to_string()))
}

pub struct SledSampleRepo {
    tree: Tree,
    next_id: AtomicI64,
}

impl SledSampleRepo {
    pub fn open(db: &Arc<sled::Db>) -> Result<Self, RepoError> {
        let tree = db.open_tree("samples").map_err(|e| RepoError::Backend(e.to_string()))?;
        let next_id = tree
            .iter()
            .keys()
            .filter_map(|k| k.ok())
            .map(|k| i64::from_be_bytes(k.as_ref().try_into().unwrap_or([0; 8])))
            .max()
            .map(|max| max + 1)
            .unwrap_or(1);
        Ok(Self {
            tree,
            next_id: AtomicI64::new(next_id),
        })
    }

    fn iter_characteristic(&self, char_id: CharacteristicId) -> Result<Vec<Sample>, RepoError> {
        let mut samples = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item.map_err(|e| RepoError::Backend(e.to_string()))?;
            let sample: Sample = de(&value)?;
            if sample.characteristic_id == char_id {
                samples.push(sample);
            }
        }
        Ok(samples)
    }

    fn put(&self, sample: &Sample) -> Result<(), RepoError> {
        self.tree
            .insert(encode_key(sample.id.0), ser(sample)?)
            .map_err(|e| RepoError::Backend(e.to_string()))?;
        Ok(())
    }

    fn get_raw(&self, sample_id: SampleId) -> Result<Sample, RepoError> {
        let bytes = self
            .tree
            .get(encode_key(sample_id.0))
            .map_err(|e| RepoError::Backend(e.to_string()))?
            .ok_or(RepoError::NotFound)?;
        de(&bytes)
    }
}

#[async_trait]
impl SampleRepo for SledSampleRepo {
    async fn insert(&self, mut sample: Sample) -> Result<(), RepoError> {
        if sample.id.0 == 0 {
            sample.id = SampleId(self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        self.put(&sample)
    }

    async fn raw_history(&self, char_id: CharacteristicId) -> Result<Vec<RawSample>, RepoError> {
        Ok(self
            .iter_characteristic(char_id)?
            .into_iter()
            .map(|s| RawSample {
                sample_id: s.id,
                timestamp: s.timestamp,
                values: s.measurements,
                mean: s.mean,
                range: s.range,
                actual_n: s.actual_n,
                excluded: s.excluded,
            })
            .collect())
    }

    async fn get(&self, sample_id: SampleId) -> Result<Option<Sample>, RepoError> {
        match self.get_raw(sample_id) {
            Ok(sample) => Ok(Some(sample)),
            Err(RepoError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_batch(
        &self,
        char_id: CharacteristicId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Sample>, RepoError> {
        let mut all = self.iter_characteristic(char_id)?;
        all.sort_by_key(|s| s.id.0);
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn mark_excluded(&self, sample_id: SampleId, reason: String) -> Result<(), RepoError> {
        let mut sample = self.get_raw(sample_id)?;
        sample.excluded = true;
        sample.exclude_reason = Some(reason);
        self.put(&sample)
    }

    async fn set_z_score(&self, sample_id: SampleId, z_score: f64) -> Result<(), RepoError> {
        let mut sample = self.get_raw(sample_id)?;
        sample.z_score = Some(z_score);
        sample.effective_ucl = None;
        sample.effective_lcl = None;
        self.put(&sample)
    }

    async fn set_effective_limits(&self, sample_id: SampleId, ucl: f64, lcl: f64) -> Result<(), RepoError> {
        let mut sample = self.get_raw(sample_id)?;
        sample.effective_ucl = Some(ucl);
        sample.effective_lcl = Some(lcl);
        sample.z_score = None;
        self.put(&sample)
    }

    async fn clear_derived_fields(&self, sample_id: SampleId) -> Result<(), RepoError> {
        let mut sample = self.get_raw(sample_id)?;
        sample.z_score = None;
        sample.effective_ucl = None;
        sample.effective_lcl = None;
        self.put(&sample)
    }
}

pub struct SledCharacteristicRepo {
    tree: Tree,
}

impl SledCharacteristicRepo {
    pub fn open(db: &Arc<sled::Db>) -> Result<Self, RepoError> {
        let tree = db
            .open_tree("characteristics")
            .map_err(|e| RepoError::Backend(e.to_string()))?;
        Ok(Self { tree })
    }

    fn get_mut(&self, char_id: CharacteristicId) -> Result<Characteristic, RepoError> {
        let bytes = self
            .tree
            .get(encode_key(char_id.0))
            .map_err(|e| RepoError::Backend(e.to_string()))?
            .ok_or(RepoError::NotFound)?;
        de(&bytes)
    }

    fn put(&self, characteristic: &Characteristic) -> Result<(), RepoError> {
        self.tree
            .insert(encode_key(characteristic.id.0), ser(characteristic)?)
            .map_err(|e| RepoError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl CharacteristicRepo for SledCharacteristicRepo {
    async fn insert(&self, characteristic: Characteristic) -> Result<(), RepoError> {
        self.put(&characteristic)
    }

    async fn get(&self, char_id: CharacteristicId) -> Result<Option<Characteristic>, RepoError> {
        match self.get_mut(char_id) {
            Ok(c) => Ok(Some(c)),
            Err(RepoError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_limits(
        &self,
        char_id: CharacteristicId,
        center_line: f64,
        sigma: f64,
        ucl: f64,
        lcl: f64,
    ) -> Result<(), RepoError> {
        let mut characteristic = self.get_mut(char_id)?;
        characteristic.stored_center_line = Some(center_line);
        characteristic.stored_sigma = Some(sigma);
        characteristic.ucl = Some(ucl);
        characteristic.lcl = Some(lcl);
        self.put(&characteristic)
    }

    async fn update_subgroup_mode(&self, char_id: CharacteristicId, mode: SubgroupMode) -> Result<(), RepoError> {
        let mut characteristic = self.get_mut(char_id)?;
        characteristic.subgroup_mode = mode;
        self.put(&characteristic)
    }

    async fn update_rule_config(
        &self,
        char_id: CharacteristicId,
        rule_id: u8,
        is_enabled: bool,
        require_acknowledgement: bool,
    ) -> Result<(), RepoError> {
        let mut characteristic = self.get_mut(char_id)?;
        characteristic.rules.insert(
            rule_id,
            RuleConfig {
                is_enabled,
                require_acknowledgement,
            },
        );
        self.put(&characteristic)
    }
}

pub struct SledViolationRepo {
    tree: Tree,
    next_id: AtomicI64,
}

impl SledViolationRepo {
    pub fn open(db: &Arc<sled::Db>) -> Result<Self, RepoError> {
        let tree = db.open_tree("violations").map_err(|e| RepoError::Backend(e.to_string()))?;
        let next_id = tree
            .iter()
            .keys()
            .filter_map(|k| k.ok())
            .map(|k| i64::from_be_bytes(k.as_ref().try_into().unwrap_or([0; 8])))
            .max()
            .map(|max| max + 1)
            .unwrap_or(1);
        Ok(Self {
            tree,
            next_id: AtomicI64::new(next_id),
        })
    }

    fn put(&self, violation: &Violation) -> Result<(), RepoError> {
        self.tree
            .insert(encode_key(violation.id.0), ser(violation)?)
            .map_err(|e| RepoError::Backend(e.to_string()))?;
        Ok(())
    }

    fn all_for(&self, char_id: CharacteristicId) -> Result<Vec<Violation>, RepoError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item.map_err(|e| RepoError::Backend(e.to_string()))?;
            let violation: Violation = de(&value)?;
            if violation.characteristic_id == char_id {
                out.push(violation);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ViolationRepo for SledViolationRepo {
    async fn insert(&self, mut violation: Violation) -> Result<(), RepoError> {
        if violation.id.0 == 0 {
            violation.id = ViolationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        self.put(&violation)
    }

    async fn list_unacknowledged(&self, char_id: CharacteristicId) -> Result<Vec<Violation>, RepoError> {
        Ok(self.all_for(char_id)?.into_iter().filter(|v| !v.acknowledged).collect())
    }

    async fn acknowledge(
        &self,
        violation_id: ViolationId,
        acknowledged_by: String,
        reason: String,
    ) -> Result<Violation, RepoError> {
        let bytes = self
            .tree
            .get(encode_key(violation_id.0))
            .map_err(|e| RepoError::Backend(e.to_string()))?
            .ok_or(RepoError::NotFound)?;
        let mut violation: Violation = de(&bytes)?;
        if violation.acknowledged {
            return Err(RepoError::Conflict(format!("violation {violation_id:?} already acknowledged")));
        }
        violation.acknowledged = true;
        violation.acknowledged_by = Some(acknowledged_by);
        violation.acknowledged_at = Some(Utc::now());
        violation.acknowledged_reason = Some(reason);
        self.put(&violation)?;
        Ok(violation)
    }

    async fn count_unacknowledged(&self, char_id: CharacteristicId) -> Result<usize, RepoError> {
        Ok(self.list_unacknowledged(char_id).await?.len())
    }

    async fn stats(&self, char_id: CharacteristicId) -> Result<ViolationStats, RepoError> {
        let mut stats = ViolationStats::default();
        for v in self.all_for(char_id)? {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubgroupMode;

    #[tokio::test]
    async fn roundtrips_characteristic_through_sled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path()).unwrap());
        let repo = SledCharacteristicRepo::open(&db).unwrap();
        let id = CharacteristicId(42);
        repo.insert(Characteristic::new(id, "Torque", SubgroupMode::NominalTolerance))
            .await
            .unwrap();
        let fetched = repo.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Torque");
    }

    #[tokio::test]
    async fn sample_ids_assigned_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path()).unwrap());
        let repo = SledSampleRepo::open(&db).unwrap();
        let char_id = CharacteristicId(1);
        for v in [1.0, 2.0, 3.0] {
            let (mean, range, actual_n) = Sample::summarize(&[v]);
            repo.insert(Sample {
                id: SampleId(0),
                characteristic_id: char_id,
                timestamp: Utc::now(),
                measurements: vec![v],
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
            })
            .await
            .unwrap();
        }
        let history = repo.raw_history(char_id).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn acknowledging_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path()).unwrap());
        let repo = SledViolationRepo::open(&db).unwrap();
        let violation = Violation::new(
            ViolationId(1),
            SampleId(1),
            CharacteristicId(1),
            1,
            "Beyond 3 Sigma",
            crate::types::Severity::Critical,
        );
        repo.insert(violation).await.unwrap();
        repo.acknowledge(ViolationId(1), "operator1".into(), "Tool Change".into())
            .await
            .unwrap();
        let err = repo
            .acknowledge(ViolationId(1), "operator2".into(), "Other".into())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
    }
}
