pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::bkt::types::{BktParameters, Skill, SkillObservation, StoredObservation};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store unavailable")]
    Unavailable,
}

/// `bkt_parameters`, keyed by (skill_id, user_id).
#[async_trait]
pub trait ParameterRepository: Send + Sync {
    async fn load_all_parameters(&self) -> Result<Vec<BktParameters>, StoreError>;

    /// Insert or replace.
    async fn save_parameters(&self, params: &BktParameters) -> Result<(), StoreError>;

    /// Ordered by skill id.
    async fn parameters_for_user(&self, user_id: &str) -> Result<Vec<BktParameters>, StoreError>;
}

/// `skill_observations`, append-only.
#[async_trait]
pub trait ObservationRepository: Send + Sync {
    /// Returns the row id.
    async fn append_observation(&self, observation: &SkillObservation) -> Result<i64, StoreError>;

    /// Ordered by row id.
    async fn observations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<StoredObservation>, StoreError>;
}

/// `skills`, a mirror of the in-memory graph for restart recovery.
#[async_trait]
pub trait SkillCatalogRepository: Send + Sync {
    /// Replaces the whole mirror with `skills`.
    async fn cache_skills(&self, skills: &[Skill]) -> Result<(), StoreError>;

    async fn load_skills(&self) -> Result<Vec<Skill>, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeCounts {
    pub parameters: u64,
    pub observations: u64,
}

#[async_trait]
pub trait BktStore: ParameterRepository + ObservationRepository + SkillCatalogRepository {
    /// Deletes every parameter and observation row of `user_id` in one go.
    async fn purge_user(&self, user_id: &str) -> Result<PurgeCounts, StoreError>;
}
