//! Per-characteristic subgroup buffering: accumulates raw tag readings
//! into subgroups and decides when a subgroup is complete according to
//! its trigger strategy.

use crate::types::CharacteristicId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// How a characteristic's subgroup buffer decides a subgroup is ready to
/// be flushed to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerStrategy {
    /// Flush as soon as the incoming value differs from the last reading
    /// buffered for this characteristic.
    OnChange,
    /// Flush once the buffer has accumulated a fixed number of readings.
    OnTrigger { subgroup_size: u32 },
}

struct PendingSubgroup {
    values: Vec<f64>,
    last_value: Option<f64>,
    first_seen: DateTime<Utc>,
}

impl PendingSubgroup {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            values: Vec::new(),
            last_value: None,
            first_seen: now,
        }
    }
}

/// Buffers raw tag readings per characteristic and yields completed
/// subgroups (as plain `Vec<f64>` measurement lists) when a trigger
/// strategy's completion condition is met, or when a dwelling partial
/// subgroup has aged past the configured timeout.
pub struct SubgroupBufferPool {
    strategies: HashMap<CharacteristicId, TriggerStrategy>,
    pending: HashMap<CharacteristicId, PendingSubgroup>,
    timeout: Duration,
}

impl SubgroupBufferPool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            strategies: HashMap::new(),
            pending: HashMap::new(),
            timeout,
        }
    }

    pub fn set_strategy(&mut self, char_id: CharacteristicId, strategy: TriggerStrategy) {
        self.strategies.insert(char_id, strategy);
    }

    fn strategy_for(&self, char_id: CharacteristicId) -> TriggerStrategy {
        self.strategies
            .get(&char_id)
            .copied()
            .unwrap_or(TriggerStrategy::OnTrigger { subgroup_size: 1 })
    }

    /// Feed one raw reading into a characteristic's buffer. Returns the
    /// completed subgroup's measurements if this reading completed it.
    pub fn push(&mut self, char_id: CharacteristicId, value: f64, now: DateTime<Utc>) -> Option<Vec<f64>> {
        let strategy = self.strategy_for(char_id);
        let entry = self.pending.entry(char_id).or_insert_with(|| PendingSubgroup::new(now));

        match strategy {
            TriggerStrategy::OnChange => {
                if let Some(last) = entry.last_value {
                    if (last - value).abs() > f64::EPSILON {
                        let completed = std::mem::take(&mut entry.values);
                        entry.last_value = Some(value);
                        entry.first_seen = now;
                        entry.values.push(value);
                        return Some(completed);
                    }
                }
                entry.last_value = Some(value);
                entry.values.push(value);
                None
            }
            TriggerStrategy::OnTrigger { subgroup_size } => {
                entry.values.push(value);
                if entry.values.len() as u32 >= subgroup_size.max(1) {
                    let completed = std::mem::take(&mut entry.values);
                    entry.first_seen = now;
                    Some(completed)
                } else {
                    None
                }
            }
        }
    }

    /// Sweep all buffers, flushing any partial subgroup whose oldest
    /// unflushed reading has dwelled past the configured timeout. Meant
    /// to be called periodically (e.g. on a tick) so a slow-filling
    /// ON_TRIGGER buffer doesn't withhold data indefinitely.
    pub fn sweep_timeouts(&mut self, now: DateTime<Utc>) -> Vec<(CharacteristicId, Vec<f64>)> {
        let timeout = self.timeout;
        let mut flushed = Vec::new();
        for (char_id, entry) in self.pending.iter_mut() {
            if entry.values.is_empty() {
                continue;
            }
            let age = now.signed_duration_since(entry.first_seen);
            if age.to_std().map(|d| d >= timeout).unwrap_or(false) {
                let completed = std::mem::take(&mut entry.values);
                entry.first_seen = now;
                flushed.push((*char_id, completed));
            }
        }
        flushed
    }
}
