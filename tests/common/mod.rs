#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;

use nix_skill_tracer::bkt::{
    BktConfig, BktParameters, KeywordClassifier, KnowledgeTracer, Skill, SkillGraph,
    SkillObservation, StoredObservation,
};
use nix_skill_tracer::db::{
    BktStore, InMemoryStore, ObservationRepository, ParameterRepository, PurgeCounts,
    SkillCatalogRepository, StoreError,
};

pub fn create_test_tracer() -> (Arc<KnowledgeTracer>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let tracer = KnowledgeTracer::new(
        Arc::new(SkillGraph::nixos()),
        Arc::new(KeywordClassifier::nixos()),
        store.clone(),
        BktConfig::default(),
    );
    (Arc::new(tracer), store)
}

/// Delegates to an `InMemoryStore`, sleeping before every parameter write.
pub struct SlowStore {
    pub inner: Arc<InMemoryStore>,
    pub delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Arc::new(InMemoryStore::new()),
            delay,
        }
    }
}

#[async_trait]
impl ParameterRepository for SlowStore {
    async fn load_all_parameters(&self) -> Result<Vec<BktParameters>, StoreError> {
        self.inner.load_all_parameters().await
    }

    async fn save_parameters(&self, params: &BktParameters) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.save_parameters(params).await
    }

    async fn parameters_for_user(&self, user_id: &str) -> Result<Vec<BktParameters>, StoreError> {
        self.inner.parameters_for_user(user_id).await
    }
}

#[async_trait]
impl ObservationRepository for SlowStore {
    async fn append_observation(&self, observation: &SkillObservation) -> Result<i64, StoreError> {
        self.inner.append_observation(observation).await
    }

    async fn observations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        self.inner.observations_for_user(user_id).await
    }
}

#[async_trait]
impl SkillCatalogRepository for SlowStore {
    async fn cache_skills(&self, skills: &[Skill]) -> Result<(), StoreError> {
        self.inner.cache_skills(skills).await
    }

    async fn load_skills(&self) -> Result<Vec<Skill>, StoreError> {
        self.inner.load_skills().await
    }
}

#[async_trait]
impl BktStore for SlowStore {
    async fn purge_user(&self, user_id: &str) -> Result<PurgeCounts, StoreError> {
        self.inner.purge_user(user_id).await
    }
}

pub fn create_slow_tracer(delay: Duration) -> (Arc<KnowledgeTracer>, Arc<InMemoryStore>) {
    let store = SlowStore::new(delay);
    let inner = Arc::clone(&store.inner);
    let tracer = KnowledgeTracer::new(
        Arc::new(SkillGraph::nixos()),
        Arc::new(KeywordClassifier::nixos()),
        Arc::new(store),
        BktConfig::default(),
    );
    (Arc::new(tracer), inner)
}

pub async fn create_test_app() -> Router {
    let (tracer, _) = create_test_tracer();
    nix_skill_tracer::create_app(tracer)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
