use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use thiserror::Error;

use crate::bkt::{GraphError, KeywordClassifier, KnowledgeTracer, SkillGraph};
use crate::config::Config;
use crate::db::{BktStore, SkillCatalogRepository, SqliteStore, StoreError};

#[derive(Debug, Error)]
pub enum InitError {
    #[error("skill graph: {0}")]
    Graph(#[from] GraphError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    tracer: Arc<KnowledgeTracer>,
}

impl AppState {
    pub fn new(tracer: Arc<KnowledgeTracer>) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            tracer,
        }
    }

    /// Opens the SQLite store, builds the graph and warms the tracer.
    pub async fn create_tracer(config: &Config) -> Result<Arc<KnowledgeTracer>, InitError> {
        let sqlite = SqliteStore::open(&config.db_path).await?;
        let graph = load_graph(config.skill_graph_path.as_deref(), &sqlite).await?;
        let store: Arc<dyn BktStore> = Arc::new(sqlite);
        tracing::info!(skills = graph.len(), default = graph.default_skill_id(), "skill graph loaded");

        let tracer = KnowledgeTracer::start(
            Arc::new(graph),
            Arc::new(KeywordClassifier::nixos()),
            store,
            config.bkt.clone(),
        )
        .await;
        Ok(Arc::new(tracer))
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn tracer(&self) -> Arc<KnowledgeTracer> {
        Arc::clone(&self.tracer)
    }
}

/// Configured file first, then the persisted `skills` mirror, then fail.
/// Without a configured file the built-in graph is used.
pub async fn load_graph(
    path: Option<&Path>,
    catalog: &dyn SkillCatalogRepository,
) -> Result<SkillGraph, GraphError> {
    let Some(path) = path else {
        return Ok(SkillGraph::nixos());
    };

    let err = match SkillGraph::from_json_file(path) {
        Ok(graph) => return Ok(graph),
        Err(err) => err,
    };
    tracing::warn!(path = %path.display(), error = %err, "skill graph file rejected, trying persisted skills");

    match catalog.load_skills().await {
        Ok(skills) if !skills.is_empty() => match SkillGraph::from_skills(skills) {
            Ok(graph) => {
                tracing::info!(skills = graph.len(), "skill graph recovered from store");
                Ok(graph)
            }
            Err(recover_err) => {
                tracing::warn!(error = %recover_err, "persisted skills do not form a valid graph");
                Err(err)
            }
        },
        Ok(_) => Err(err),
        Err(store_err) => {
            tracing::warn!(error = %store_err, "failed to read persisted skills");
            Err(err)
        }
    }
}
