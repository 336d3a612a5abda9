//! Alert manager: turns triggered rule violations into tracked, acknowledgeable
//! records and reports on their status.

use crate::events::{Event, EventBus};
use crate::repo::{RepoError, SampleRepo, ViolationRepo};
use crate::types::{CharacteristicId, SampleId, Severity, Violation, ViolationId};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("violation {0:?} is already acknowledged")]
    AlreadyAcknowledged(ViolationId),
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
}

/// Fixed human-readable reason text per Nelson rule id, used as the
/// default violation description shown to an operator — distinct from the
/// acknowledgement reason code an operator picks when clearing one.
pub fn rule_description(rule_id: u8) -> &'static str {
    match rule_id {
        1 => "One point beyond 3 sigma from center line.",
        2 => "Nine consecutive points on the same side of center line.",
        3 => "Six consecutive points steadily increasing or decreasing.",
        4 => "Fourteen consecutive points alternating up and down.",
        5 => "Two of three consecutive points beyond 2 sigma, same side.",
        6 => "Four of five consecutive points beyond 1 sigma, same side.",
        7 => "Fifteen consecutive points within 1 sigma of center line.",
        8 => "Eight consecutive points beyond 1 sigma with none within.",
        _ => "Unknown rule.",
    }
}

/// The fixed catalog of reasons an operator may give when acknowledging a
/// violation. Not every shop floor cause maps to a Nelson rule, so this is
/// kept separate from [`rule_description`].
pub const REASON_CODES: &[&str] = &[
    "Tool Change",
    "Measurement Error",
    "Material Lot Change",
    "Operator Error",
    "Equipment Adjustment",
    "Calibration",
    "Process Change",
    "Environmental",
    "Setup Change",
    "Investigation Ongoing",
    "Other",
];

pub struct AlertManager {
    sample_repo: Arc<dyn SampleRepo>,
    violation_repo: Arc<dyn ViolationRepo>,
    event_bus: Arc<EventBus>,
}

impl AlertManager {
    pub fn new(
        sample_repo: Arc<dyn SampleRepo>,
        violation_repo: Arc<dyn ViolationRepo>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            sample_repo,
            violation_repo,
            event_bus,
        }
    }

    /// Persist one record per already-triggered rule result and notify
    /// every subscriber via `ViolationCreated`. Notifier failures (logged
    /// by the event bus itself) never roll back the persistence already
    /// done here.
    pub async fn create_violations(&self, violations: Vec<Violation>) -> Result<Vec<Violation>, AlertError> {
        for violation in &violations {
            self.violation_repo.insert(violation.clone()).await?;
            self.event_bus
                .publish(Event::ViolationCreated {
                    characteristic_id: violation.characteristic_id,
                    sample_id: violation.sample_id,
                    violation_id: violation.id,
                    rule_id: violation.rule_id,
                })
                .await;
        }
        Ok(violations)
    }

    /// Acknowledge a violation, recording who acknowledged it, why, and
    /// publishing `ViolationAcknowledged`. Fails with
    /// `AlertError::AlreadyAcknowledged` if the violation was already
    /// acknowledged. When `exclude_sample` is set, also marks the owning
    /// sample excluded — the caller is responsible for invalidating the
    /// characteristic's rolling window afterward.
    pub async fn acknowledge(
        &self,
        violation_id: ViolationId,
        acknowledged_by: impl Into<String>,
        reason: impl Into<String>,
        exclude_sample: bool,
    ) -> Result<Violation, AlertError> {
        let acknowledged_by = acknowledged_by.into();
        let reason = reason.into();
        let violation = match self
            .violation_repo
            .acknowledge(violation_id, acknowledged_by.clone(), reason.clone())
            .await
        {
            Ok(v) => v,
            Err(RepoError::Conflict(_)) => return Err(AlertError::AlreadyAcknowledged(violation_id)),
            Err(e) => return Err(e.into()),
        };

        if exclude_sample {
            self.sample_repo.mark_excluded(violation.sample_id, reason.clone()).await?;
        }

        self.event_bus
            .publish(Event::ViolationAcknowledged {
                violation_id: violation.id,
                acknowledged_by,
            })
            .await;
        Ok(violation)
    }

    /// Count of unacknowledged violations for a characteristic among
    /// rules whose `require_acknowledgement` is set — violations from a
    /// rule with acknowledgement not required never enter this count even
    /// though they were recorded and published like any other.
    pub async fn unacknowledged_count(
        &self,
        char_id: CharacteristicId,
        characteristic: &crate::types::Characteristic,
    ) -> Result<usize, AlertError> {
        let unacked = self.violation_repo.list_unacknowledged(char_id).await?;
        Ok(unacked
            .iter()
            .filter(|v| characteristic.rule_config(v.rule_id).require_acknowledgement)
            .count())
    }

    pub async fn stats(&self, char_id: CharacteristicId) -> Result<crate::repo::ViolationStats, AlertError> {
        Ok(self.violation_repo.stats(char_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::{InMemorySampleRepo, InMemoryViolationRepo};
    use crate::types::{Characteristic, SubgroupMode};

    fn manager(
        sample_repo: Arc<InMemorySampleRepo>,
        violation_repo: Arc<InMemoryViolationRepo>,
        event_bus: Arc<EventBus>,
    ) -> AlertManager {
        AlertManager::new(sample_repo, violation_repo, event_bus)
    }

    #[tokio::test]
    async fn acknowledge_publishes_event_and_updates_repo() {
        let sample_repo = Arc::new(InMemorySampleRepo::new());
        let violation_repo = Arc::new(InMemoryViolationRepo::new());
        let event_bus = Arc::new(EventBus::new());
        let char_id = CharacteristicId(1);
        violation_repo
            .insert(Violation::new(
                ViolationId(1),
                SampleId(1),
                char_id,
                1,
                "Beyond 3 Sigma",
                Severity::Critical,
            ))
            .await
            .unwrap();

        let mgr = manager(sample_repo, violation_repo.clone(), event_bus);
        mgr.acknowledge(ViolationId(1), "operator1", "Tool Change", false)
            .await
            .unwrap();
        assert_eq!(violation_repo.count_unacknowledged(char_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn acknowledging_twice_fails() {
        let sample_repo = Arc::new(InMemorySampleRepo::new());
        let violation_repo = Arc::new(InMemoryViolationRepo::new());
        let event_bus = Arc::new(EventBus::new());
        let char_id = CharacteristicId(1);
        violation_repo
            .insert(Violation::new(
                ViolationId(1),
                SampleId(1),
                char_id,
                1,
                "Beyond 3 Sigma",
                Severity::Critical,
            ))
            .await
            .unwrap();

        let mgr = manager(sample_repo, violation_repo, event_bus);
        mgr.acknowledge(ViolationId(1), "operator1", "Tool Change", false)
            .await
            .unwrap();
        let err = mgr
            .acknowledge(ViolationId(1), "operator2", "Other", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::AlreadyAcknowledged(_)));
    }

    #[tokio::test]
    async fn acknowledge_with_exclude_sample_marks_sample_excluded() {
        let sample_repo = Arc::new(InMemorySampleRepo::new());
        let violation_repo = Arc::new(InMemoryViolationRepo::new());
        let event_bus = Arc::new(EventBus::new());
        let char_id = CharacteristicId(1);
        let sample_id = sample_repo.seed_raw(char_id, vec![20.0]).await;
        violation_repo
            .insert(Violation::new(
                ViolationId(1),
                sample_id,
                char_id,
                1,
                "Beyond 3 Sigma",
                Severity::Critical,
            ))
            .await
            .unwrap();

        let mgr = manager(sample_repo.clone(), violation_repo, event_bus);
        mgr.acknowledge(ViolationId(1), "operator1", "Measurement Error", true)
            .await
            .unwrap();

        let sample = sample_repo.get(sample_id).await.unwrap().unwrap();
        assert!(sample.excluded);
        assert_eq!(sample.exclude_reason.as_deref(), Some("Measurement Error"));
    }

    #[tokio::test]
    async fn create_violations_persists_and_publishes() {
        let sample_repo = Arc::new(InMemorySampleRepo::new());
        let violation_repo = Arc::new(InMemoryViolationRepo::new());
        let event_bus = Arc::new(EventBus::new());
        let char_id = CharacteristicId(1);

        let mgr = manager(sample_repo, violation_repo.clone(), event_bus);
        let violation = Violation::new(ViolationId(1), SampleId(1), char_id, 1, "Beyond 3 Sigma", Severity::Critical);
        let created = mgr.create_violations(vec![violation]).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(violation_repo.count_unacknowledged(char_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unacknowledged_count_excludes_rules_not_requiring_ack() {
        let sample_repo = Arc::new(InMemorySampleRepo::new());
        let violation_repo = Arc::new(InMemoryViolationRepo::new());
        let event_bus = Arc::new(EventBus::new());
        let char_id = CharacteristicId(1);
        violation_repo
            .insert(Violation::new(
                ViolationId(1),
                SampleId(1),
                char_id,
                7,
                "Fifteen Points Within 1 Sigma",
                Severity::Warning,
            ))
            .await
            .unwrap();

        let mut characteristic = Characteristic::new(char_id, "Test", SubgroupMode::NominalTolerance);
        characteristic.rules.insert(
            7,
            crate::types::RuleConfig {
                is_enabled: true,
                require_acknowledgement: false,
            },
        );

        let mgr = manager(sample_repo, violation_repo, event_bus);
        let count = mgr.unacknowledged_count(char_id, &characteristic).await.unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn reason_catalog_is_fixed() {
        assert!(REASON_CODES.contains(&"Tool Change"));
        assert!(REASON_CODES.contains(&"Other"));
    }
}
