use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies a monitored characteristic. Newtype over `i64` to keep it
/// from being accidentally mixed up with a `SampleId`/`ViolationId` at
/// call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharacteristicId(pub i64);

/// How a characteristic's control limits are interpreted against incoming
/// samples. See the control-limit calculator and sample pipeline for how
/// each mode drives classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubgroupMode {
    /// Fixed UCL/LCL taken from nominal/tolerance or a stored calculation;
    /// every sample is classified against the same boundaries regardless
    /// of its own subgroup size.
    NominalTolerance,
    /// Samples are charted as z-scores against a stored center line and
    /// sigma; boundaries scale per-sample with `sigma / sqrt(actual_n)`.
    Standardized,
    /// Each sample gets its own effective UCL/LCL recomputed from the
    /// stored center line/sigma and its own `actual_n`.
    VariableLimits,
}

/// Per-rule configuration for one of the 8 Nelson Rules on a characteristic.
/// Rules absent from a characteristic's configuration default to enabled
/// with acknowledgement required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub is_enabled: bool,
    pub require_acknowledgement: bool,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            is_enabled: true,
            require_acknowledgement: true,
        }
    }
}

/// A monitored product or process characteristic: the unit of control-chart
/// bookkeeping samples are recorded against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Characteristic {
    pub id: CharacteristicId,
    pub name: String,
    pub subgroup_mode: SubgroupMode,
    /// Nominal subgroup size (n ≥ 1) this characteristic is sampled at.
    /// Drives sigma-estimation method selection and, in `NominalTolerance`
    /// mode, the upper bound on an incoming sample's measurement count.
    pub subgroup_size: u32,
    /// Floor on an incoming sample's measurement count; fewer is rejected
    /// outright. Must be `<= subgroup_size`.
    pub min_measurements: u32,
    /// Threshold below which an accepted sample is flagged `is_undersized`
    /// rather than rejected. Must be `<= subgroup_size` when set.
    pub warn_below_count: u32,
    /// Nominal target value, used when limits come from tolerance rather
    /// than calculation.
    pub nominal: Option<f64>,
    /// Current control limits and center line. `None` until a calculation
    /// or manual override has populated them.
    pub stored_center_line: Option<f64>,
    pub stored_sigma: Option<f64>,
    pub ucl: Option<f64>,
    pub lcl: Option<f64>,
    pub min_samples: u32,
    pub rules: HashMap<u8, RuleConfig>,
}

impl Characteristic {
    pub fn new(id: CharacteristicId, name: impl Into<String>, subgroup_mode: SubgroupMode) -> Self {
        Self {
            id,
            name: name.into(),
            subgroup_mode,
            subgroup_size: 1,
            min_measurements: 1,
            warn_below_count: 1,
            nominal: None,
            stored_center_line: None,
            stored_sigma: None,
            ucl: None,
            lcl: None,
            min_samples: 25,
            rules: HashMap::new(),
        }
    }

    /// Rule configuration for `rule_id`, falling back to the documented
    /// default (enabled, acknowledgement required) when unset.
    pub fn rule_config(&self, rule_id: u8) -> RuleConfig {
        self.rules.get(&rule_id).copied().unwrap_or_default()
    }

    pub fn has_calculated_limits(&self) -> bool {
        self.stored_center_line.is_some() && self.stored_sigma.is_some()
    }

    /// Whether a sample of `actual_n` measurements should be flagged
    /// undersized: fewer than the larger of `warn_below_count` and
    /// `subgroup_size`.
    pub fn is_undersized(&self, actual_n: u32) -> bool {
        actual_n < self.warn_below_count.max(self.subgroup_size)
    }
}
