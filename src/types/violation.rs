use super::characteristic::CharacteristicId;
use super::sample::SampleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViolationId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Critical,
}

/// A single triggered Nelson Rule, attached to the sample whose arrival
/// caused the rule to fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: ViolationId,
    pub sample_id: SampleId,
    pub characteristic_id: CharacteristicId,
    pub rule_id: u8,
    pub rule_name: &'static str,
    pub severity: Severity,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_reason: Option<String>,
}

impl Violation {
    pub fn new(
        id: ViolationId,
        sample_id: SampleId,
        characteristic_id: CharacteristicId,
        rule_id: u8,
        rule_name: &'static str,
        severity: Severity,
    ) -> Self {
        Self {
            id,
            sample_id,
            characteristic_id,
            rule_id,
            rule_name,
            severity,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            acknowledged_reason: None,
        }
    }
}
