//! Abstract repository traits the engine depends on. The relational
//! storage engine behind these traits is out of scope here; only the
//! operations the engine needs are specified. `memory` provides an
//! in-process implementation suitable for tests and small deployments;
//! `sled_store` provides a durable embedded-database-backed one.

pub mod memory;
pub mod sled_store;

use crate::types::{Characteristic, CharacteristicId, Sample, SampleId, SubgroupMode, Violation, ViolationId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

/// The minimal projection of a stored sample's raw measurement data, used
/// to lazily hydrate a rolling window without attaching a full ORM entity
/// graph.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub sample_id: SampleId,
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
    pub mean: f64,
    pub range: Option<f64>,
    pub actual_n: u32,
    pub excluded: bool,
}

#[async_trait]
pub trait SampleRepo: Send + Sync {
    async fn insert(&self, sample: Sample) -> Result<(), RepoError>;

    /// Raw `{sample_id, timestamp, values}` tuples for hydrating a rolling
    /// window, oldest first. Never returns a full ORM-attached `Sample`
    /// graph — callers that need the full record use `get`.
    async fn raw_history(&self, char_id: CharacteristicId) -> Result<Vec<RawSample>, RepoError>;

    async fn get(&self, sample_id: SampleId) -> Result<Option<Sample>, RepoError>;

    async fn list_batch(
        &self,
        char_id: CharacteristicId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Sample>, RepoError>;

    async fn mark_excluded(&self, sample_id: SampleId, reason: String) -> Result<(), RepoError>;

    async fn set_z_score(&self, sample_id: SampleId, z_score: f64) -> Result<(), RepoError>;

    async fn set_effective_limits(&self, sample_id: SampleId, ucl: f64, lcl: f64) -> Result<(), RepoError>;

    async fn clear_derived_fields(&self, sample_id: SampleId) -> Result<(), RepoError>;
}

#[async_trait]
pub trait CharacteristicRepo: Send + Sync {
    async fn insert(&self, characteristic: Characteristic) -> Result<(), RepoError>;

    async fn get(&self, char_id: CharacteristicId) -> Result<Option<Characteristic>, RepoError>;

    async fn update_limits(
        &self,
        char_id: CharacteristicId,
        center_line: f64,
        sigma: f64,
        ucl: f64,
        lcl: f64,
    ) -> Result<(), RepoError>;

    async fn update_subgroup_mode(&self, char_id: CharacteristicId, mode: SubgroupMode) -> Result<(), RepoError>;

    async fn update_rule_config(
        &self,
        char_id: CharacteristicId,
        rule_id: u8,
        is_enabled: bool,
        require_acknowledgement: bool,
    ) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ViolationRepo: Send + Sync {
    async fn insert(&self, violation: Violation) -> Result<(), RepoError>;

    async fn list_unacknowledged(&self, char_id: CharacteristicId) -> Result<Vec<Violation>, RepoError>;

    /// Acknowledge a violation. Fails with `RepoError::Conflict` if the
    /// violation is already acknowledged.
    async fn acknowledge(
        &self,
        violation_id: ViolationId,
        acknowledged_by: String,
        reason: String,
    ) -> Result<Violation, RepoError>;

    async fn count_unacknowledged(&self, char_id: CharacteristicId) -> Result<usize, RepoError>;

    async fn stats(&self, char_id: CharacteristicId) -> Result<ViolationStats, RepoError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViolationStats {
    pub total: usize,
    pub acknowledged: usize,
    pub unacknowledged: usize,
    pub critical: usize,
    pub warning: usize,
}
