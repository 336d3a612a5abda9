//! Engine tuning configuration.
//!
//! This is deliberately narrow: a handful of internally tunable engine
//! parameters (window sizing, default thresholds, MQTT backoff), not a
//! general-purpose multi-source config loader. Call `config::init()` once
//! at startup, then `config::get()` anywhere in the engine.
//!
//! ```ignore
//! config::init(EngineConfig::default());
//! let capacity = config::get().window_cache_capacity;
//! ```

use std::sync::OnceLock;
use std::time::Duration;

/// Engine-wide tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum number of characteristics the window manager keeps hydrated
    /// at once before evicting the least-recently-used entry.
    pub window_cache_capacity: usize,
    /// Default `min_samples` threshold for control-limit calculation when
    /// a caller doesn't specify one.
    pub default_min_samples: u32,
    /// How long a tag-intake subgroup buffer waits for a dwelling partial
    /// subgroup before flushing it regardless of trigger state.
    pub buffer_timeout: Duration,
    /// Initial delay before the first MQTT reconnect attempt.
    pub mqtt_reconnect_initial_delay: Duration,
    /// Upper bound the exponential reconnect backoff is capped at.
    pub mqtt_reconnect_max_delay: Duration,
    /// Number of reconnect attempts before the intake client gives up and
    /// logs rather than retrying indefinitely.
    pub mqtt_max_reconnect_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_cache_capacity: 1000,
            default_min_samples: 25,
            buffer_timeout: Duration::from_secs(60),
            mqtt_reconnect_initial_delay: Duration::from_secs(2),
            mqtt_reconnect_max_delay: Duration::from_secs(60),
            mqtt_max_reconnect_attempts: 10,
        }
    }
}

static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Initialize the global engine configuration.
///
/// Must be called exactly once before any calls to `get()`. A second call
/// is logged and ignored rather than treated as an error.
pub fn init(config: EngineConfig) {
    if ENGINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global engine configuration.
///
/// Panics if `init()` has not been called. This is by design — a missing
/// config is a startup bug, not a recoverable runtime condition.
pub fn get() -> &'static EngineConfig {
    ENGINE_CONFIG
        .get()
        .expect("config::get() called before config::init() - this is a startup bug")
}

pub fn is_initialized() -> bool {
    ENGINE_CONFIG.get().is_some()
}
