//! Statistical process control engine core: rolling-window control
//! charting, Nelson Rule violation detection, and Sparkplug B tag intake
//! for industrial quality monitoring.

pub mod alerts;
pub mod config;
pub mod engine;
pub mod events;
pub mod intake;
pub mod repo;
pub mod sparkplug;
pub mod types;

pub use engine::{CalculationResult, ControlLimitCalculator, NelsonRule, PipelineError, ProcessingResult, SamplePipeline};
pub use events::{Event, EventBus};
pub use types::{Characteristic, CharacteristicId, Sample, SampleId, SubgroupMode, Violation, ViolationId, Zone};
