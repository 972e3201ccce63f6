use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bkt::config::BktConfig;
use crate::bkt::graph::SkillGraph;
use crate::bkt::types::{BktParameters, Skill, SkillType, StoredObservation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSuggestion {
    pub skill_id: String,
    pub name: String,
    pub difficulty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeGap {
    pub skill_id: String,
    pub name: String,
    pub mastery: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub user_id: String,
    pub total_skills: usize,
    pub mastered_skills: usize,
    pub learning_skills: usize,
    pub beginning_skills: usize,
    pub overall_progress: f64,
    pub average_mastery_by_type: BTreeMap<SkillType, f64>,
    pub next_suggestions: Vec<SkillSuggestion>,
    pub knowledge_gaps: Vec<KnowledgeGap>,
    pub generated_at: DateTime<Utc>,
}

/// Read-only view of one skill for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillReport {
    pub user_id: String,
    pub skill: Skill,
    /// False when the numbers below are difficulty defaults.
    pub tracked: bool,
    pub mastery: f64,
    pub confidence: f64,
    pub observation_count: i64,
    pub predicted_success: f64,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub prerequisites_met: bool,
}

/// Everything stored for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BktExport {
    pub user_id: String,
    pub parameters: Vec<BktParameters>,
    pub observations: Vec<StoredObservation>,
    pub progress_summary: ProgressSummary,
    pub export_timestamp: DateTime<Utc>,
}

pub fn build_progress_summary(
    user_id: &str,
    graph: &SkillGraph,
    masteries: &BTreeMap<String, f64>,
    next_suggestions: Vec<SkillSuggestion>,
    knowledge_gaps: Vec<KnowledgeGap>,
    config: &BktConfig,
) -> ProgressSummary {
    let total_skills = masteries.len();
    let mastered_skills = masteries
        .values()
        .filter(|m| **m >= config.mastered_threshold)
        .count();
    let learning_skills = masteries
        .values()
        .filter(|m| **m >= config.learning_threshold && **m < config.mastered_threshold)
        .count();
    let beginning_skills = masteries
        .values()
        .filter(|m| **m < config.learning_threshold)
        .count();

    let mut by_type: BTreeMap<SkillType, (f64, usize)> = BTreeMap::new();
    for (skill_id, mastery) in masteries {
        if let Some(skill) = graph.skill(skill_id) {
            let entry = by_type.entry(skill.skill_type).or_insert((0.0, 0));
            entry.0 += mastery;
            entry.1 += 1;
        }
    }
    let average_mastery_by_type = by_type
        .into_iter()
        .map(|(ty, (sum, n))| (ty, sum / n as f64))
        .collect();

    ProgressSummary {
        user_id: user_id.to_string(),
        total_skills,
        mastered_skills,
        learning_skills,
        beginning_skills,
        overall_progress: if total_skills > 0 {
            mastered_skills as f64 / total_skills as f64
        } else {
            0.0
        },
        average_mastery_by_type,
        next_suggestions,
        knowledge_gaps,
        generated_at: Utc::now(),
    }
}
