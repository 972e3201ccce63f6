//! Knowledge tracer
//!
//! Owns the in-memory parameter cache and drives every tracing operation:
//! lazy parameter creation, Bayesian updates, recommendations, and the
//! export/import/reset privacy operations. Storage is best-effort: failures
//! are logged and the in-memory result is still returned.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};

use crate::bkt::classifier::SkillClassifier;
use crate::bkt::config::BktConfig;
use crate::bkt::graph::SkillGraph;
use crate::bkt::model;
use crate::bkt::report::{
    build_progress_summary, BktExport, KnowledgeGap, ProgressSummary, SkillReport,
    SkillSuggestion,
};
use crate::bkt::types::{
    BktParameters, ObservationContext, ParamKey, Skill, SkillObservation, SkillType,
};
use crate::db::BktStore;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("parameter row for user {found} does not belong to export of {expected}")]
    ForeignParameters { expected: String, found: String },
    #[error("observation for user {found} does not belong to export of {expected}")]
    ForeignObservation { expected: String, found: String },
    #[error("unknown skill in import: {0}")]
    UnknownSkill(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub parameters: usize,
    pub observations: usize,
}

pub struct KnowledgeTracer {
    graph: Arc<SkillGraph>,
    classifier: Arc<dyn SkillClassifier>,
    store: Arc<dyn BktStore>,
    config: BktConfig,
    parameters: RwLock<HashMap<ParamKey, BktParameters>>,
    /// Updates of one user hold the read side; reset and import hold the
    /// write side so no update straddles a purge.
    user_locks: Mutex<HashMap<String, Arc<AsyncRwLock<()>>>>,
    key_locks: Mutex<HashMap<ParamKey, Arc<AsyncMutex<()>>>>,
}

impl KnowledgeTracer {
    pub fn new(
        graph: Arc<SkillGraph>,
        classifier: Arc<dyn SkillClassifier>,
        store: Arc<dyn BktStore>,
        config: BktConfig,
    ) -> Self {
        Self {
            graph,
            classifier,
            store,
            config,
            parameters: RwLock::new(HashMap::new()),
            user_locks: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a tracer, mirrors the graph into the store and warms the cache
    /// from persisted parameters.
    pub async fn start(
        graph: Arc<SkillGraph>,
        classifier: Arc<dyn SkillClassifier>,
        store: Arc<dyn BktStore>,
        config: BktConfig,
    ) -> Self {
        let tracer = Self::new(graph, classifier, store, config);
        tracer.sync_skill_catalog().await;
        tracer.warm_cache().await;
        tracer
    }

    pub fn graph(&self) -> &SkillGraph {
        &self.graph
    }

    pub fn config(&self) -> &BktConfig {
        &self.config
    }

    pub async fn sync_skill_catalog(&self) {
        let skills: Vec<_> = self.graph.skills().cloned().collect();
        if let Err(err) = self.store.cache_skills(&skills).await {
            tracing::warn!(error = %err, "failed to cache skill graph");
        }
    }

    /// Loads persisted parameters into the cache; returns how many were loaded.
    pub async fn warm_cache(&self) -> usize {
        match self.store.load_all_parameters().await {
            Ok(rows) => {
                let mut cache = self.parameters.write();
                let count = rows.len();
                for row in rows {
                    let row = row.sanitized();
                    cache.insert(row.key(), row);
                }
                tracing::info!(count, "skill parameters loaded");
                count
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to load skill parameters");
                0
            }
        }
    }

    pub fn cached_parameters(&self, user_id: &str, skill_id: &str) -> Option<BktParameters> {
        self.parameters
            .read()
            .get(&ParamKey::new(user_id, skill_id))
            .cloned()
    }

    /// Defaults for a pair without a record. Prerequisites are only read from
    /// the cache, never created.
    fn default_parameters(
        &self,
        cache: &HashMap<ParamKey, BktParameters>,
        user_id: &str,
        skill_id: &str,
    ) -> BktParameters {
        let now = Utc::now();
        let Some(skill) = self.graph.skill(skill_id) else {
            let unlisted = Skill {
                skill_id: skill_id.to_string(),
                name: skill_id.to_string(),
                skill_type: SkillType::Concept,
                prerequisites: Vec::new(),
                difficulty: 0.5,
                learning_objectives: Vec::new(),
                examples: Vec::new(),
            };
            return model::initial_parameters(user_id, &unlisted, &[], now);
        };
        let prereqs: Vec<Option<f64>> = skill
            .prerequisites
            .iter()
            .map(|prereq| {
                cache
                    .get(&ParamKey::new(user_id, prereq.as_str()))
                    .map(|p| p.current_mastery)
            })
            .collect();
        model::initial_parameters(user_id, skill, &prereqs, now)
    }

    /// Returns the record for (user, skill), creating and persisting it on
    /// first reference. Unknown skills resolve to the catch-all skill.
    pub async fn get_or_create_parameters(&self, user_id: &str, skill_id: &str) -> BktParameters {
        let key = ParamKey::new(user_id, self.graph.resolve_skill_id(skill_id));
        let params = {
            let user_lock = self.user_lock(user_id);
            let _user_guard = user_lock.read().await;
            let key_lock = self.key_lock(&key);
            let _key_guard = key_lock.lock().await;
            self.get_or_create_locked(&key).await
        };
        self.release_locks(&key);
        params
    }

    /// Caller holds the key lock of `key`.
    async fn get_or_create_locked(&self, key: &ParamKey) -> BktParameters {
        let created = {
            let mut cache = self.parameters.write();
            if let Some(existing) = cache.get(key) {
                return existing.clone();
            }
            let fresh = self.default_parameters(&cache, &key.user_id, &key.skill_id);
            cache.insert(key.clone(), fresh.clone());
            fresh
        };

        tracing::debug!(
            user_id = %created.user_id,
            skill_id = %created.skill_id,
            prior = created.prior_knowledge,
            "created skill parameters"
        );
        if let Err(err) = self.store.save_parameters(&created).await {
            tracing::warn!(
                error = %err,
                user_id = %created.user_id,
                skill_id = %created.skill_id,
                "failed to persist new skill parameters"
            );
        }
        created
    }

    fn user_lock(&self, user_id: &str) -> Arc<AsyncRwLock<()>> {
        let mut locks = self.user_locks.lock();
        Arc::clone(
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(AsyncRwLock::new(()))),
        )
    }

    fn key_lock(&self, key: &ParamKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.key_locks.lock();
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Drops registry entries nobody else holds, keeping both registries
    /// bounded by the number of in-flight operations.
    fn release_locks(&self, key: &ParamKey) {
        prune_lock(&self.key_locks, key);
        prune_lock(&self.user_locks, &key.user_id);
    }

    /// Applies one observation. Same-key updates are serialized; the
    /// observation is not de-duplicated, so replaying it counts twice.
    pub async fn update_mastery(&self, mut observation: SkillObservation) -> BktParameters {
        let resolved = self.graph.resolve_skill_id(&observation.skill_id).to_string();
        if resolved != observation.skill_id {
            tracing::debug!(
                requested = %observation.skill_id,
                resolved = %resolved,
                "unknown skill mapped to default"
            );
            observation.skill_id = resolved;
        }

        let key = ParamKey::new(observation.user_id.as_str(), observation.skill_id.as_str());
        let updated = {
            let user_lock = self.user_lock(&key.user_id);
            let _user_guard = user_lock.read().await;
            let key_lock = self.key_lock(&key);
            let _key_guard = key_lock.lock().await;
            self.apply_locked(&key, &observation).await
        };
        self.release_locks(&key);
        updated
    }

    async fn apply_locked(&self, key: &ParamKey, observation: &SkillObservation) -> BktParameters {
        let current = self.get_or_create_locked(key).await;
        let previous_mastery = current.current_mastery;
        let updated = model::apply_observation(
            current,
            observation.success,
            &observation.context,
            Utc::now(),
        );

        self.parameters.write().insert(key.clone(), updated.clone());

        if let Err(err) = self.store.save_parameters(&updated).await {
            tracing::warn!(
                error = %err,
                user_id = %updated.user_id,
                skill_id = %updated.skill_id,
                "failed to persist skill parameters"
            );
        }
        if let Err(err) = self.store.append_observation(observation).await {
            tracing::warn!(
                error = %err,
                observation_id = %observation.observation_id,
                "failed to append skill observation"
            );
        }

        tracing::debug!(
            user_id = %updated.user_id,
            skill_id = %updated.skill_id,
            success = observation.success,
            from = previous_mastery,
            to = updated.current_mastery,
            observations = updated.observation_count,
            "mastery updated"
        );
        updated
    }

    /// Classifies the interaction into a skill and applies it.
    pub async fn record_interaction_with_bkt(
        &self,
        user_id: &str,
        command: &str,
        intent: &str,
        success: bool,
        mut context: ObservationContext,
    ) -> Option<BktParameters> {
        let skill_id = self.classifier.identify_skill(command, intent);
        if skill_id.trim().is_empty() {
            tracing::warn!(user_id, command, intent, "classifier returned no skill");
            return None;
        }

        if context.command.is_none() && !command.is_empty() {
            context.command = Some(command.to_string());
        }
        if context.intent.is_none() && !intent.is_empty() {
            context.intent = Some(intent.to_string());
        }

        let observation = SkillObservation::new(user_id, skill_id, success, context);
        Some(self.update_mastery(observation).await)
    }

    /// Mastery for every graph skill; untracked skills get the difficulty
    /// default and no record is created.
    pub fn get_user_skill_masteries(&self, user_id: &str) -> BTreeMap<String, f64> {
        let cache = self.parameters.read();
        self.graph
            .skills()
            .map(|skill| {
                let mastery = cache
                    .get(&ParamKey::new(user_id, skill.skill_id.as_str()))
                    .map(|p| p.current_mastery)
                    .unwrap_or_else(|| model::default_prior(skill.difficulty));
                (skill.skill_id.clone(), mastery)
            })
            .collect()
    }

    pub fn suggest_next_skills_for_user(
        &self,
        user_id: &str,
        threshold: f64,
    ) -> Vec<SkillSuggestion> {
        let masteries = self.get_user_skill_masteries(user_id);
        self.graph
            .suggest_next_skills(&masteries, threshold)
            .into_iter()
            .take(self.config.max_suggestions)
            .filter_map(|skill_id| {
                self.graph.skill(&skill_id).map(|skill| SkillSuggestion {
                    skill_id: skill.skill_id.clone(),
                    name: skill.name.clone(),
                    difficulty: skill.difficulty,
                })
            })
            .collect()
    }

    /// Weak skills other skills build on, weakest first.
    pub fn identify_knowledge_gaps(&self, user_id: &str) -> Vec<KnowledgeGap> {
        let masteries = self.get_user_skill_masteries(user_id);
        let mut gaps: Vec<KnowledgeGap> = masteries
            .into_iter()
            .filter(|(skill_id, mastery)| {
                *mastery < self.config.gap_threshold && self.graph.has_dependents(skill_id)
            })
            .filter_map(|(skill_id, mastery)| {
                self.graph.skill(&skill_id).map(|skill| KnowledgeGap {
                    skill_id,
                    name: skill.name.clone(),
                    mastery,
                })
            })
            .collect();

        gaps.sort_by(|a, b| {
            a.mastery
                .total_cmp(&b.mastery)
                .then_with(|| a.skill_id.cmp(&b.skill_id))
        });
        gaps.truncate(self.config.max_gaps);
        gaps
    }

    /// Read-only: an untracked pair is scored from defaults without storing them.
    pub fn predict_success_probability(&self, user_id: &str, skill_id: &str) -> f64 {
        let skill_id = self.graph.resolve_skill_id(skill_id);
        let cache = self.parameters.read();
        let params = cache
            .get(&ParamKey::new(user_id, skill_id))
            .cloned()
            .unwrap_or_else(|| self.default_parameters(&cache, user_id, skill_id));
        model::predict_success(&params)
    }

    pub fn get_learning_progress_summary(&self, user_id: &str) -> ProgressSummary {
        let masteries = self.get_user_skill_masteries(user_id);
        let suggestions = self.suggest_next_skills_for_user(user_id, self.config.suggestion_threshold);
        let gaps = self.identify_knowledge_gaps(user_id);
        build_progress_summary(
            user_id,
            &self.graph,
            &masteries,
            suggestions,
            gaps,
            &self.config,
        )
    }

    /// `None` for skills outside the graph.
    pub fn get_skill_report(&self, user_id: &str, skill_id: &str) -> Option<SkillReport> {
        let skill = self.graph.skill(skill_id)?.clone();
        let cache = self.parameters.read();

        let stored = cache.get(&ParamKey::new(user_id, skill_id)).cloned();
        let tracked = stored.is_some();
        let params = stored.unwrap_or_else(|| self.default_parameters(&cache, user_id, skill_id));

        let threshold = self.config.suggestion_threshold;
        let prerequisites_met = skill.prerequisites.iter().all(|prereq| {
            let mastery = cache
                .get(&ParamKey::new(user_id, prereq.as_str()))
                .map(|p| p.current_mastery)
                .or_else(|| self.graph.skill(prereq).map(|s| model::default_prior(s.difficulty)))
                .unwrap_or(0.0);
            mastery >= threshold
        });

        Some(SkillReport {
            user_id: user_id.to_string(),
            dependencies: self.graph.get_skill_dependencies(skill_id),
            dependents: self.graph.get_skills_depending_on(skill_id),
            tracked,
            mastery: params.current_mastery,
            confidence: params.confidence,
            observation_count: params.observation_count,
            predicted_success: model::predict_success(&params),
            prerequisites_met,
            skill,
        })
    }

    /// All stored rows of `user_id` plus a progress summary. If the store
    /// cannot be read, cached parameters stand in and observations are empty.
    pub async fn export_bkt_data(&self, user_id: &str) -> BktExport {
        let parameters = match self.store.parameters_for_user(user_id).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, user_id, "export falling back to cached parameters");
                let mut rows: Vec<_> = self
                    .parameters
                    .read()
                    .values()
                    .filter(|p| p.user_id == user_id)
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));
                rows
            }
        };

        let observations = match self.store.observations_for_user(user_id).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, user_id, "export without observation log");
                Vec::new()
            }
        };

        BktExport {
            user_id: user_id.to_string(),
            parameters,
            observations,
            progress_summary: self.get_learning_progress_summary(user_id),
            export_timestamp: Utc::now(),
        }
    }

    /// Replaces everything stored for `export.user_id` with the export's rows.
    pub async fn import_bkt_data(&self, export: &BktExport) -> Result<ImportSummary, ImportError> {
        let user_id = export.user_id.as_str();

        for params in &export.parameters {
            if params.user_id != user_id {
                return Err(ImportError::ForeignParameters {
                    expected: user_id.to_string(),
                    found: params.user_id.clone(),
                });
            }
            if !self.graph.contains(&params.skill_id) {
                return Err(ImportError::UnknownSkill(params.skill_id.clone()));
            }
        }
        for stored in &export.observations {
            let observation = &stored.observation;
            if observation.user_id != user_id {
                return Err(ImportError::ForeignObservation {
                    expected: user_id.to_string(),
                    found: observation.user_id.clone(),
                });
            }
            if !self.graph.contains(&observation.skill_id) {
                return Err(ImportError::UnknownSkill(observation.skill_id.clone()));
            }
        }

        let user_lock = self.user_lock(user_id);
        let summary = {
            let _write_guard = user_lock.write().await;
            self.purge_locked(user_id).await;
            self.restore_locked(export).await
        };
        drop(user_lock);
        prune_lock(&self.user_locks, &export.user_id);

        tracing::info!(
            user_id,
            parameters = summary.parameters,
            observations = summary.observations,
            "skill data imported"
        );
        Ok(summary)
    }

    /// Caller holds the write side of the user lock.
    async fn restore_locked(&self, export: &BktExport) -> ImportSummary {
        let user_id = export.user_id.as_str();

        let rows: Vec<BktParameters> = export
            .parameters
            .iter()
            .cloned()
            .map(BktParameters::sanitized)
            .collect();
        {
            let mut cache = self.parameters.write();
            for row in &rows {
                cache.insert(row.key(), row.clone());
            }
        }
        for row in &rows {
            if let Err(err) = self.store.save_parameters(row).await {
                tracing::warn!(error = %err, user_id, skill_id = %row.skill_id, "failed to persist imported parameters");
            }
        }
        for stored in &export.observations {
            if let Err(err) = self.store.append_observation(&stored.observation).await {
                tracing::warn!(error = %err, user_id, "failed to persist imported observation");
            }
        }

        ImportSummary {
            parameters: rows.len(),
            observations: export.observations.len(),
        }
    }

    /// Deletes every stored row of `user_id` and drops it from the cache.
    /// Waits for in-flight updates of the user to finish first.
    pub async fn reset_user_bkt_data(&self, user_id: &str) {
        let user_lock = self.user_lock(user_id);
        {
            let _write_guard = user_lock.write().await;
            self.purge_locked(user_id).await;
        }
        drop(user_lock);
        prune_lock(&self.user_locks, &user_id.to_string());
    }

    /// Caller holds the write side of the user lock.
    async fn purge_locked(&self, user_id: &str) {
        match self.store.purge_user(user_id).await {
            Ok(counts) => tracing::info!(
                user_id,
                parameters = counts.parameters,
                observations = counts.observations,
                "skill data reset"
            ),
            Err(err) => tracing::warn!(error = %err, user_id, "failed to purge stored skill data"),
        }

        self.parameters.write().retain(|key, _| key.user_id != user_id);
    }
}

fn prune_lock<K, L>(registry: &Mutex<HashMap<K, Arc<L>>>, key: &K)
where
    K: Eq + Hash,
{
    let mut locks = registry.lock();
    if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
        locks.remove(key);
    }
}
