//! Sample pipeline: the orchestrator that turns an incoming measurement
//! subgroup into a classified, rule-evaluated, persisted `Sample` plus any
//! triggered `Violation`s.

use super::control_limits::{CalculationError, ControlLimitCalculator};
use super::nelson_rules::NelsonRuleLibrary;
use super::statistics::sigma_of_mean;
use super::window_manager::WindowManager;
use crate::alerts::{AlertError, AlertManager};
use crate::events::{Event, EventBus};
use crate::repo::{CharacteristicRepo, RepoError, SampleRepo};
use crate::types::{
    Characteristic, CharacteristicId, Sample, SampleId, SubgroupMode, Violation, WindowPoint, ZoneBoundaries,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("characteristic {0:?} not found")]
    NotFound(CharacteristicId),
    #[error("a sample needs at least one measurement")]
    ValidationError,
    #[error("characteristic {0:?} has no stored center line/sigma required by its subgroup mode")]
    ModeNotConfigured(CharacteristicId),
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("control limit calculation error: {0}")]
    Calculation(#[from] CalculationError),
    #[error("alert manager error: {0}")]
    Alert(#[from] AlertError),
}

/// Optional context accompanying an incoming sample: a specific timestamp
/// (defaults to now), the production batch/operator it is attributed to,
/// and, for automated tag intake, the subgroup's source.
#[derive(Debug, Clone, Default)]
pub struct ProcessingContext {
    pub timestamp: Option<DateTime<Utc>>,
    pub batch: Option<String>,
    pub operator: Option<String>,
    /// Provenance label, e.g. `"TAG"` for samples flushed by tag intake.
    /// `None` for manually submitted samples.
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub sample: Sample,
    pub violations: Vec<Violation>,
    pub processing_time_ms: u64,
}

impl ProcessingResult {
    pub fn in_control(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct SamplePipeline {
    sample_repo: Arc<dyn SampleRepo>,
    char_repo: Arc<dyn CharacteristicRepo>,
    window_manager: Arc<WindowManager>,
    control_limit_calculator: Arc<ControlLimitCalculator>,
    alert_manager: Arc<AlertManager>,
    rule_library: NelsonRuleLibrary,
    event_bus: Arc<EventBus>,
    next_sample_id: AtomicI64,
    next_violation_id: AtomicI64,
}

impl SamplePipeline {
    pub fn new(
        sample_repo: Arc<dyn SampleRepo>,
        char_repo: Arc<dyn CharacteristicRepo>,
        window_manager: Arc<WindowManager>,
        control_limit_calculator: Arc<ControlLimitCalculator>,
        alert_manager: Arc<AlertManager>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            sample_repo,
            char_repo,
            window_manager,
            control_limit_calculator,
            alert_manager,
            rule_library: NelsonRuleLibrary::new(),
            event_bus,
            next_sample_id: AtomicI64::new(1),
            next_violation_id: AtomicI64::new(1),
        }
    }

    fn alloc_sample_id(&self) -> SampleId {
        SampleId(self.next_sample_id.fetch_add(1, Ordering::SeqCst))
    }

    fn alloc_violation_id(&self) -> crate::types::ViolationId {
        crate::types::ViolationId(self.next_violation_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Zone boundaries for this processing pass: derived directly from
    /// `ucl`/`lcl` when the characteristic has them set, otherwise
    /// recalculated (and persisted) from its sample history.
    async fn boundaries_for(
        &self,
        char_id: CharacteristicId,
        characteristic: &Characteristic,
    ) -> Result<ZoneBoundaries, PipelineError> {
        if let (Some(ucl), Some(lcl)) = (characteristic.ucl, characteristic.lcl) {
            let center_line = (ucl + lcl) / 2.0;
            let sigma_of_mean = (ucl - lcl) / 6.0;
            return Ok(ZoneBoundaries::with_reference_n(
                center_line,
                sigma_of_mean,
                characteristic.subgroup_size.max(1),
            ));
        }

        let result = self
            .control_limit_calculator
            .recalculate_and_persist(char_id, characteristic.min_samples)
            .await?;
        let reference_n = characteristic.subgroup_size.max(1);
        Ok(ZoneBoundaries::with_reference_n(
            result.center_line,
            sigma_of_mean(result.sigma, reference_n),
            reference_n,
        ))
    }

    /// Process one subgroup of measurements for a characteristic: classify,
    /// evaluate Nelson Rules, persist the sample and any violations, and
    /// publish the resulting events.
    ///
    /// Steps 7-10 (open transaction, persist sample, persist violations,
    /// commit) are modeled here as sequential repository writes rather
    /// than an explicit database transaction object, since the storage
    /// engine itself is outside this crate's scope; a real backing store
    /// is expected to wrap its repository implementation in a transaction
    /// that spans exactly this sequence.
    pub async fn process_sample(
        &self,
        char_id: CharacteristicId,
        measurements: Vec<f64>,
        context: ProcessingContext,
    ) -> Result<ProcessingResult, PipelineError> {
        let start = Instant::now();

        let characteristic = self
            .char_repo
            .get(char_id)
            .await?
            .ok_or(PipelineError::NotFound(char_id))?;

        let submitted_n = measurements.len() as u32;
        if submitted_n < characteristic.min_measurements.max(1) {
            return Err(PipelineError::ValidationError);
        }
        if characteristic.subgroup_mode == SubgroupMode::NominalTolerance
            && submitted_n > characteristic.subgroup_size
        {
            return Err(PipelineError::ValidationError);
        }
        let is_undersized = characteristic.is_undersized(submitted_n);

        let window_handle = self.window_manager.get(char_id).await?;

        let (mean, range, actual_n) = Sample::summarize(&measurements);
        let timestamp = context.timestamp.unwrap_or_else(Utc::now);
        let sample_id = self.alloc_sample_id();

        let boundaries = self.boundaries_for(char_id, &characteristic).await?;
        let (effective_ucl, effective_lcl, z_score) =
            derive_mode_fields(&characteristic, &boundaries, mean, actual_n)?;

        let zone = {
            let mut window = window_handle.lock().await;
            window.set_boundaries(boundaries);
            window
                .classify_for_mode(mean, actual_n, characteristic.subgroup_mode)
                .unwrap_or(crate::types::Zone::ZoneCUpper)
        };

        let sample = Sample {
            id: sample_id,
            characteristic_id: char_id,
            timestamp,
            measurements,
            mean,
            range,
            actual_n,
            is_undersized,
            batch: context.batch,
            operator: context.operator,
            zone,
            z_score,
            effective_ucl,
            effective_lcl,
            excluded: false,
            exclude_reason: None,
        };

        let point = WindowPoint::from_sample(&sample);

        let violations = {
            let mut window = window_handle.lock().await;
            window.append(point);
            let points: Vec<WindowPoint> = window.samples().iter().copied().collect();
            drop(window);
            self.rule_library
                .check_all(&characteristic, &points, || self.alloc_violation_id())
        };

        // Steps 7-10: persist sample, persist violations, "commit".
        self.sample_repo.insert(sample.clone()).await?;
        let violations = self.alert_manager.create_violations(violations).await?;

        self.event_bus
            .publish(Event::SampleProcessed {
                characteristic_id: char_id,
                sample_id: sample.id,
                zone: sample.zone,
                timestamp: sample.timestamp,
            })
            .await;

        let processing_time_ms = start.elapsed().as_millis() as u64;

        Ok(ProcessingResult {
            sample,
            violations,
            processing_time_ms,
        })
    }

    /// Mark a previously processed sample as excluded. The rolling window
    /// is invalidated so a cached hydration never keeps counting the
    /// excluded point toward rule evaluation or limit recalculation.
    pub async fn exclude_sample(
        &self,
        char_id: CharacteristicId,
        sample_id: SampleId,
        reason: impl Into<String>,
    ) -> Result<(), PipelineError> {
        self.sample_repo.mark_excluded(sample_id, reason.into()).await?;
        self.window_manager.invalidate(char_id).await;
        Ok(())
    }
}

fn derive_mode_fields(
    characteristic: &Characteristic,
    boundaries: &ZoneBoundaries,
    mean: f64,
    actual_n: u32,
) -> Result<(Option<f64>, Option<f64>, Option<f64>), PipelineError> {
    match characteristic.subgroup_mode {
        SubgroupMode::NominalTolerance => Ok((None, None, None)),
        SubgroupMode::Standardized => {
            if !characteristic.has_calculated_limits() {
                return Err(PipelineError::ModeNotConfigured(characteristic.id));
            }
            let rescaled = boundaries.rescale_to(actual_n);
            let z = if rescaled.sigma_of_mean > 0.0 {
                (mean - rescaled.center_line) / rescaled.sigma_of_mean
            } else {
                0.0
            };
            Ok((None, None, Some(z)))
        }
        SubgroupMode::VariableLimits => {
            if !characteristic.has_calculated_limits() {
                return Err(PipelineError::ModeNotConfigured(characteristic.id));
            }
            let rescaled = boundaries.rescale_to(actual_n);
            Ok((Some(rescaled.ucl()), Some(rescaled.lcl()), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::{InMemoryCharacteristicRepo, InMemorySampleRepo, InMemoryViolationRepo};
    use crate::types::SubgroupMode;

    async fn build_pipeline() -> (SamplePipeline, CharacteristicId) {
        let sample_repo = Arc::new(InMemorySampleRepo::new());
        let char_repo = Arc::new(InMemoryCharacteristicRepo::new());
        let violation_repo = Arc::new(InMemoryViolationRepo::new());
        let event_bus = Arc::new(EventBus::new());
        let window_manager = Arc::new(WindowManager::new(sample_repo.clone(), char_repo.clone(), 100));
        let control_limit_calculator = Arc::new(ControlLimitCalculator::new(
            sample_repo.clone(),
            char_repo.clone(),
            window_manager.clone(),
            event_bus.clone(),
        ));
        let alert_manager = Arc::new(AlertManager::new(
            sample_repo.clone(),
            violation_repo.clone(),
            event_bus.clone(),
        ));

        let char_id = CharacteristicId(1);
        let mut characteristic = Characteristic::new(char_id, "Diameter", SubgroupMode::NominalTolerance);
        characteristic.stored_center_line = Some(10.0);
        characteristic.stored_sigma = Some(1.0);
        characteristic.ucl = Some(13.0);
        characteristic.lcl = Some(7.0);
        char_repo.insert(characteristic).await.unwrap();
        window_manager
            .update_boundaries(char_id, crate::types::ZoneBoundaries::new(10.0, 1.0))
            .await
            .unwrap();

        let pipeline = SamplePipeline::new(
            sample_repo,
            char_repo,
            window_manager,
            control_limit_calculator,
            alert_manager,
            event_bus,
        );
        (pipeline, char_id)
    }

    #[tokio::test]
    async fn empty_measurements_rejected() {
        let (pipeline, char_id) = build_pipeline().await;
        let err = pipeline
            .process_sample(char_id, vec![], ProcessingContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ValidationError));
    }

    #[tokio::test]
    async fn unknown_characteristic_rejected() {
        let (pipeline, _char_id) = build_pipeline().await;
        let err = pipeline
            .process_sample(CharacteristicId(999), vec![1.0], ProcessingContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn beyond_limit_sample_triggers_rule1() {
        let (pipeline, char_id) = build_pipeline().await;
        let result = pipeline
            .process_sample(char_id, vec![20.0], ProcessingContext::default())
            .await
            .unwrap();
        assert!(!result.in_control());
        assert!(result.violations.iter().any(|v| v.rule_id == 1));
    }

    #[tokio::test]
    async fn in_control_sample_has_no_violations() {
        let (pipeline, char_id) = build_pipeline().await;
        let result = pipeline
            .process_sample(char_id, vec![10.1], ProcessingContext::default())
            .await
            .unwrap();
        assert!(result.in_control());
    }

    #[tokio::test]
    async fn processing_time_is_recorded() {
        let (pipeline, char_id) = build_pipeline().await;
        let result = pipeline
            .process_sample(char_id, vec![10.1], ProcessingContext::default())
            .await
            .unwrap();
        assert!(result.processing_time_ms < 1000);
    }

    #[tokio::test]
    async fn oversized_nominal_tolerance_sample_rejected() {
        let (pipeline, char_id) = build_pipeline().await;
        // subgroup_size defaults to 1 in NominalTolerance mode; two
        // measurements exceed it.
        let err = pipeline
            .process_sample(char_id, vec![10.0, 10.1], ProcessingContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ValidationError));
    }

    #[tokio::test]
    async fn undersized_sample_is_flagged_not_rejected() {
        let sample_repo = Arc::new(InMemorySampleRepo::new());
        let char_repo = Arc::new(InMemoryCharacteristicRepo::new());
        let violation_repo = Arc::new(InMemoryViolationRepo::new());
        let event_bus = Arc::new(EventBus::new());
        let window_manager = Arc::new(WindowManager::new(sample_repo.clone(), char_repo.clone(), 100));
        let control_limit_calculator = Arc::new(ControlLimitCalculator::new(
            sample_repo.clone(),
            char_repo.clone(),
            window_manager.clone(),
            event_bus.clone(),
        ));
        let alert_manager = Arc::new(AlertManager::new(
            sample_repo.clone(),
            violation_repo,
            event_bus.clone(),
        ));

        let char_id = CharacteristicId(1);
        let mut characteristic = Characteristic::new(char_id, "Torque", SubgroupMode::NominalTolerance);
        characteristic.subgroup_size = 5;
        characteristic.min_measurements = 2;
        characteristic.warn_below_count = 5;
        characteristic.ucl = Some(13.0);
        characteristic.lcl = Some(7.0);
        char_repo.insert(characteristic).await.unwrap();

        let pipeline = SamplePipeline::new(
            sample_repo,
            char_repo,
            window_manager,
            control_limit_calculator,
            alert_manager,
            event_bus,
        );

        let result = pipeline
            .process_sample(char_id, vec![10.0, 10.1, 9.9], ProcessingContext::default())
            .await
            .unwrap();
        assert!(result.sample.is_undersized);
    }

    #[tokio::test]
    async fn standardized_mode_without_stored_limits_is_rejected() {
        let sample_repo = Arc::new(InMemorySampleRepo::new());
        let char_repo = Arc::new(InMemoryCharacteristicRepo::new());
        let violation_repo = Arc::new(InMemoryViolationRepo::new());
        let event_bus = Arc::new(EventBus::new());
        let window_manager = Arc::new(WindowManager::new(sample_repo.clone(), char_repo.clone(), 100));
        let control_limit_calculator = Arc::new(ControlLimitCalculator::new(
            sample_repo.clone(),
            char_repo.clone(),
            window_manager.clone(),
            event_bus.clone(),
        ));
        let alert_manager = Arc::new(AlertManager::new(
            sample_repo.clone(),
            violation_repo,
            event_bus.clone(),
        ));

        let char_id = CharacteristicId(1);
        let mut characteristic = Characteristic::new(char_id, "Torque", SubgroupMode::Standardized);
        characteristic.ucl = Some(13.0);
        characteristic.lcl = Some(7.0);
        char_repo.insert(characteristic).await.unwrap();

        let pipeline = SamplePipeline::new(
            sample_repo,
            char_repo,
            window_manager,
            control_limit_calculator,
            alert_manager,
            event_bus,
        );

        let err = pipeline
            .process_sample(char_id, vec![10.0], ProcessingContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModeNotConfigured(_)));
    }
}
