//! Statistical engine: rolling windows, the Nelson rule library, control
//! limit calculation, and the sample-processing pipeline that ties them
//! together.

pub mod control_limits;
pub mod nelson_rules;
pub mod pipeline;
pub mod rolling_window;
pub mod statistics;
pub mod window_manager;

pub use control_limits::{CalculationError, CalculationResult, ControlLimitCalculator};
pub use nelson_rules::{NelsonRule, NelsonRuleLibrary};
pub use pipeline::{PipelineError, ProcessingContext, ProcessingResult, SamplePipeline};
pub use rolling_window::RollingWindow;
pub use window_manager::WindowManager;
