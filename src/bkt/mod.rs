//! Bayesian Knowledge Tracing over a skill graph.

pub mod classifier;
pub mod config;
pub mod graph;
pub mod model;
pub mod report;
pub mod tracer;
pub mod types;

pub use classifier::{KeywordClassifier, SkillClassifier};
pub use config::BktConfig;
pub use graph::{GraphError, SkillGraph, DEFAULT_SKILL_ID};
pub use report::{BktExport, KnowledgeGap, ProgressSummary, SkillReport, SkillSuggestion};
pub use tracer::{ImportError, ImportSummary, KnowledgeTracer};
pub use types::{
    BktParameters, ErrorType, ObservationContext, Skill, SkillObservation, SkillType,
    StoredObservation,
};
