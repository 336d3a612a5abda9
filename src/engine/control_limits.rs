//! Control-limit calculation: select a sigma-estimation method from
//! subgroup size, compute center line/sigma/UCL/LCL from historical
//! samples, and persist the result onto a characteristic.

use super::statistics::{estimate_sigma, round4, sample_std_dev, sigma_of_mean, SigmaMethod};
use crate::engine::window_manager::WindowManager;
use crate::events::{Event, EventBus};
use crate::repo::{CharacteristicRepo, RepoError, SampleRepo};
use crate::types::{CharacteristicId, SubgroupMode, ZoneBoundaries};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalculationError {
    #[error("characteristic {0:?} not found")]
    NotFound(CharacteristicId),
    #[error("insufficient samples: need at least {required}, found {found}")]
    InsufficientSamples { required: u32, found: u32 },
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
}

/// Result of a control-limit calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationResult {
    pub method: SigmaMethod,
    pub center_line: f64,
    pub sigma: f64,
    pub ucl: f64,
    pub lcl: f64,
    pub sample_count: usize,
    pub excluded_count: usize,
}

pub struct ControlLimitCalculator {
    sample_repo: Arc<dyn SampleRepo>,
    char_repo: Arc<dyn CharacteristicRepo>,
    window_manager: Arc<WindowManager>,
    event_bus: Arc<EventBus>,
}

impl ControlLimitCalculator {
    pub fn new(
        sample_repo: Arc<dyn SampleRepo>,
        char_repo: Arc<dyn CharacteristicRepo>,
        window_manager: Arc<WindowManager>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            sample_repo,
            char_repo,
            window_manager,
            event_bus,
        }
    }

    /// Compute limits for `char_id` from its stored sample history and
    /// persist them, without touching the rolling-window cache's point
    /// data (only its boundaries, via invalidation).
    pub async fn recalculate_and_persist(
        &self,
        char_id: CharacteristicId,
        min_samples: u32,
    ) -> Result<CalculationResult, CalculationError> {
        let characteristic = self
            .char_repo
            .get(char_id)
            .await?
            .ok_or(CalculationError::NotFound(char_id))?;

        let raw = self.sample_repo.raw_history(char_id).await?;
        let included: Vec<_> = raw.into_iter().filter(|s| !s.excluded).collect();
        if (included.len() as u32) < min_samples {
            return Err(CalculationError::InsufficientSamples {
                required: min_samples,
                found: included.len() as u32,
            });
        }

        let subgroup_size = characteristic.subgroup_size.max(1);
        let method = SigmaMethod::for_subgroup_size(subgroup_size);

        let means: Vec<f64> = included
            .iter()
            .map(|s| s.values.iter().sum::<f64>() / s.values.len() as f64)
            .collect();
        let center_line = means.iter().sum::<f64>() / means.len() as f64;

        let sigma = match method {
            SigmaMethod::MovingRange => estimate_sigma(method, &means, &[], subgroup_size),
            SigmaMethod::Range => {
                let ranges: Vec<f64> = included
                    .iter()
                    .map(|s| {
                        let max = s.values.iter().cloned().fold(f64::MIN, f64::max);
                        let min = s.values.iter().cloned().fold(f64::MAX, f64::min);
                        max - min
                    })
                    .collect();
                estimate_sigma(method, &means, &ranges, subgroup_size)
            }
            SigmaMethod::StandardDeviation => {
                let std_devs: Vec<f64> = included.iter().map(|s| sample_std_dev(&s.values)).collect();
                estimate_sigma(method, &means, &std_devs, subgroup_size)
            }
        }
        .ok_or(CalculationError::InsufficientSamples {
            required: min_samples.max(2),
            found: included.len() as u32,
        })?;

        let som = sigma_of_mean(sigma, subgroup_size);
        let ucl = round4(center_line + 3.0 * som);
        let lcl = round4(center_line - 3.0 * som);
        let center_line = round4(center_line);
        let sigma = round4(sigma);

        self.char_repo
            .update_limits(char_id, center_line, sigma, ucl, lcl)
            .await?;
        self.window_manager.invalidate(char_id).await;
        self.event_bus
            .publish(Event::ControlLimitsUpdated {
                characteristic_id: char_id,
                center_line,
                ucl,
                lcl,
            })
            .await;

        Ok(CalculationResult {
            method,
            center_line,
            sigma,
            ucl,
            lcl,
            sample_count: included.len(),
            excluded_count: 0,
        })
    }

    /// Manually set control limits from an external source (e.g. a
    /// capability study), bypassing calculation entirely. Still
    /// invalidates the rolling-window cache so stale boundaries never
    /// outlive the change.
    pub async fn set_manual_limits(
        &self,
        char_id: CharacteristicId,
        center_line: f64,
        sigma: f64,
        ucl: f64,
        lcl: f64,
    ) -> Result<(), CalculationError> {
        self.char_repo
            .get(char_id)
            .await?
            .ok_or(CalculationError::NotFound(char_id))?;
        self.char_repo
            .update_limits(char_id, center_line, sigma, ucl, lcl)
            .await?;
        self.window_manager.invalidate(char_id).await;
        Ok(())
    }

    /// Migrate a characteristic's existing samples' derived fields
    /// (`z_score`, `effective_ucl`/`effective_lcl`) to match a new
    /// subgroup mode, then switch the mode. Moving to `NominalTolerance`
    /// clears both derived fields; moving to `Standardized` or
    /// `VariableLimits` requires `stored_sigma`/`stored_center_line` to
    /// already be set. Processes samples in bounded batches so the
    /// migration never needs to hold a characteristic's full history in
    /// memory at once.
    pub async fn migrate_subgroup_mode(
        &self,
        char_id: CharacteristicId,
        new_mode: SubgroupMode,
    ) -> Result<usize, CalculationError> {
        const BATCH_SIZE: usize = 500;

        let characteristic = self
            .char_repo
            .get(char_id)
            .await?
            .ok_or(CalculationError::NotFound(char_id))?;

        if matches!(new_mode, SubgroupMode::Standardized | SubgroupMode::VariableLimits)
            && !characteristic.has_calculated_limits()
        {
            return Err(CalculationError::InsufficientSamples {
                required: 0,
                found: 0,
            });
        }

        let center_line = characteristic.stored_center_line.unwrap_or(0.0);
        let sigma = characteristic.stored_sigma.unwrap_or(0.0);

        let mut migrated = 0usize;
        let mut offset = 0usize;
        loop {
            let batch = self.sample_repo.list_batch(char_id, offset, BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }
            for sample in &batch {
                match new_mode {
                    SubgroupMode::NominalTolerance => {
                        self.sample_repo.clear_derived_fields(sample.id).await?;
                    }
                    SubgroupMode::Standardized => {
                        let som = sigma_of_mean(sigma, sample.actual_n);
                        let z = if som > 0.0 {
                            (sample.mean - center_line) / som
                        } else {
                            0.0
                        };
                        self.sample_repo.set_z_score(sample.id, z).await?;
                    }
                    SubgroupMode::VariableLimits => {
                        let som = sigma_of_mean(sigma, sample.actual_n);
                        let ucl = center_line + 3.0 * som;
                        let lcl = center_line - 3.0 * som;
                        self.sample_repo.set_effective_limits(sample.id, ucl, lcl).await?;
                    }
                }
                migrated += 1;
            }
            offset += BATCH_SIZE;
        }

        self.char_repo.update_subgroup_mode(char_id, new_mode).await?;
        self.window_manager.invalidate(char_id).await;
        Ok(migrated)
    }

    /// Build boundaries suitable for seeding a freshly hydrated rolling
    /// window from a characteristic's currently stored limits.
    pub fn boundaries_from_characteristic(characteristic: &crate::types::Characteristic, reference_n: u32) -> Option<ZoneBoundaries> {
        let center_line = characteristic.stored_center_line?;
        let sigma = characteristic.stored_sigma?;
        Some(ZoneBoundaries::with_reference_n(
            center_line,
            sigma_of_mean(sigma, reference_n),
            reference_n,
        ))
    }
}
