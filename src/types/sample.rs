use super::characteristic::CharacteristicId;
use super::zone::Zone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleId(pub i64);

/// A subgroup of one or more raw measurements collected together and
/// processed as a single point on the control chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub characteristic_id: CharacteristicId,
    pub timestamp: DateTime<Utc>,
    pub measurements: Vec<f64>,
    pub mean: f64,
    /// `max - min` of the measurements; `None` for single-measurement
    /// subgroups (n = 1), where range is meaningless.
    pub range: Option<f64>,
    pub actual_n: u32,
    /// True when `actual_n` fell below the characteristic's undersized
    /// threshold; the sample is still processed, just flagged.
    pub is_undersized: bool,
    /// Optional production batch/lot label supplied by the caller.
    pub batch: Option<String>,
    /// Optional operator identifier supplied by the caller.
    pub operator: Option<String>,
    pub zone: Zone,
    /// Populated only in `Standardized` mode.
    pub z_score: Option<f64>,
    /// Populated only in `VariableLimits` mode.
    pub effective_ucl: Option<f64>,
    pub effective_lcl: Option<f64>,
    pub excluded: bool,
    pub exclude_reason: Option<String>,
}

impl Sample {
    /// Derive mean/range/actual_n from a raw measurement set. Panics-free:
    /// callers are expected to have already rejected empty measurement
    /// sets as a `ValidationError` before reaching this point.
    pub fn summarize(measurements: &[f64]) -> (f64, Option<f64>, u32) {
        let n = measurements.len() as u32;
        let mean = measurements.iter().sum::<f64>() / measurements.len() as f64;
        let range = if measurements.len() > 1 {
            let max = measurements.iter().cloned().fold(f64::MIN, f64::max);
            let min = measurements.iter().cloned().fold(f64::MAX, f64::min);
            Some(max - min)
        } else {
            None
        };
        (mean, range, n)
    }
}

/// The minimal per-sample projection the rolling window needs. Built from
/// a `Sample` once it has been classified, not a reference to the full
/// record — the window must stay cheap to hold `WindowManager::capacity`
/// of these per cached characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowPoint {
    pub sample_id: SampleId,
    pub timestamp: DateTime<Utc>,
    pub mean: f64,
    pub range: Option<f64>,
    pub actual_n: u32,
    pub zone: Zone,
}

impl WindowPoint {
    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            sample_id: sample.id,
            timestamp: sample.timestamp,
            mean: sample.mean,
            range: sample.range,
            actual_n: sample.actual_n,
            zone: sample.zone,
        }
    }
}
