use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::bkt::types::{BktParameters, ParamKey, Skill, SkillObservation, StoredObservation};
use crate::db::{
    BktStore, ObservationRepository, ParameterRepository, PurgeCounts, SkillCatalogRepository,
    StoreError,
};

#[derive(Default)]
struct Tables {
    parameters: HashMap<ParamKey, BktParameters>,
    observations: Vec<StoredObservation>,
    next_observation_id: i64,
    skills: BTreeMap<String, Skill>,
}

/// Process-local store for tests and ephemeral runs.
///
/// `set_available(false)` makes every call fail with `StoreError::Unavailable`,
/// which is how outage handling gets exercised.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn parameter_count(&self) -> usize {
        self.tables.read().parameters.len()
    }

    pub fn observation_count(&self) -> usize {
        self.tables.read().observations.len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParameterRepository for InMemoryStore {
    async fn load_all_parameters(&self) -> Result<Vec<BktParameters>, StoreError> {
        self.check()?;
        let mut all: Vec<_> = self.tables.read().parameters.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(all)
    }

    async fn save_parameters(&self, params: &BktParameters) -> Result<(), StoreError> {
        self.check()?;
        self.tables
            .write()
            .parameters
            .insert(params.key(), params.clone());
        Ok(())
    }

    async fn parameters_for_user(&self, user_id: &str) -> Result<Vec<BktParameters>, StoreError> {
        self.check()?;
        let mut rows: Vec<_> = self
            .tables
            .read()
            .parameters
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));
        Ok(rows)
    }
}

#[async_trait]
impl ObservationRepository for InMemoryStore {
    async fn append_observation(&self, observation: &SkillObservation) -> Result<i64, StoreError> {
        self.check()?;
        let mut tables = self.tables.write();
        tables.next_observation_id += 1;
        let id = tables.next_observation_id;
        tables.observations.push(StoredObservation {
            id,
            observation: observation.clone(),
        });
        Ok(id)
    }

    async fn observations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .observations
            .iter()
            .filter(|o| o.observation.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SkillCatalogRepository for InMemoryStore {
    async fn cache_skills(&self, skills: &[Skill]) -> Result<(), StoreError> {
        self.check()?;
        let mut tables = self.tables.write();
        tables.skills.clear();
        for skill in skills {
            tables.skills.insert(skill.skill_id.clone(), skill.clone());
        }
        Ok(())
    }

    async fn load_skills(&self) -> Result<Vec<Skill>, StoreError> {
        self.check()?;
        Ok(self.tables.read().skills.values().cloned().collect())
    }
}

#[async_trait]
impl BktStore for InMemoryStore {
    async fn purge_user(&self, user_id: &str) -> Result<PurgeCounts, StoreError> {
        self.check()?;
        let mut tables = self.tables.write();

        let before = tables.parameters.len();
        tables.parameters.retain(|key, _| key.user_id != user_id);
        let parameters = (before - tables.parameters.len()) as u64;

        let before = tables.observations.len();
        tables.observations.retain(|o| o.observation.user_id != user_id);
        let observations = (before - tables.observations.len()) as u64;

        Ok(PurgeCounts {
            parameters,
            observations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bkt::types::ObservationContext;
    use chrono::Utc;

    fn params(user: &str, skill: &str) -> BktParameters {
        BktParameters {
            user_id: user.to_string(),
            skill_id: skill.to_string(),
            prior_knowledge: 0.2,
            learning_rate: 0.3,
            slip_probability: 0.1,
            guess_probability: 0.1,
            current_mastery: 0.2,
            confidence: 0.5,
            observation_count: 0,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_purge_only_touches_one_user() {
        let store = InMemoryStore::new();
        store.save_parameters(&params("alice", "nix_env")).await.unwrap();
        store.save_parameters(&params("bob", "nix_env")).await.unwrap();
        store
            .append_observation(&SkillObservation::new(
                "alice",
                "nix_env",
                true,
                ObservationContext::default(),
            ))
            .await
            .unwrap();

        let counts = store.purge_user("alice").await.unwrap();
        assert_eq!(counts.parameters, 1);
        assert_eq!(counts.observations, 1);
        assert_eq!(store.parameter_count(), 1);
        assert!(store.parameters_for_user("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skill_mirror_is_replaced() {
        let store = InMemoryStore::new();
        let graph = crate::bkt::SkillGraph::nixos();
        let all: Vec<Skill> = graph.skills().cloned().collect();
        store.cache_skills(&all).await.unwrap();

        store.cache_skills(&all[..1]).await.unwrap();

        let mirrored = store.load_skills().await.unwrap();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].skill_id, all[0].skill_id);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.save_parameters(&params("alice", "nix_env")).await,
            Err(StoreError::Unavailable)
        ));
        assert!(store.load_skills().await.is_err());
        store.set_available(true);
        assert!(store.load_skills().await.is_ok());
    }
}
