//! NixOS skill graph
//!
//! A DAG of skills connected by prerequisite edges. The graph is immutable
//! once built; every query is a pure read.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use thiserror::Error;

use crate::bkt::types::{Skill, SkillType};

/// Catch-all skill for unresolved skill ids.
pub const DEFAULT_SKILL_ID: &str = "nix_basics";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("skill graph is empty")]
    Empty,
    #[error("duplicate skill id: {0}")]
    DuplicateSkill(String),
    #[error("skill {skill} lists unknown prerequisite {prerequisite}")]
    UnknownPrerequisite { skill: String, prerequisite: String },
    #[error("skill {0} has a difficulty outside [0, 1]")]
    InvalidDifficulty(String),
    #[error("prerequisite cycle through skill {0}")]
    Cycle(String),
    #[error("failed to read skill graph: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid skill graph json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct SkillGraph {
    skills: BTreeMap<String, Skill>,
    dependents: HashMap<String, Vec<String>>,
    default_skill_id: String,
}

impl SkillGraph {
    /// Validates and builds a graph from arbitrary skills.
    pub fn from_skills(skills: Vec<Skill>) -> Result<Self, GraphError> {
        validate(&skills)?;
        let default_skill_id = pick_default(&skills).ok_or(GraphError::Empty)?;
        Ok(Self::assemble(skills, default_skill_id))
    }

    /// Loads a JSON array of skills.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let raw = std::fs::read_to_string(path)?;
        let skills: Vec<Skill> = serde_json::from_str(&raw)?;
        Self::from_skills(skills)
    }

    /// The built-in NixOS curriculum.
    pub fn nixos() -> Self {
        Self::assemble(nixos_skills(), DEFAULT_SKILL_ID.to_string())
    }

    fn assemble(skills: Vec<Skill>, default_skill_id: String) -> Self {
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut by_id = BTreeMap::new();

        for skill in skills {
            for prereq in &skill.prerequisites {
                dependents
                    .entry(prereq.clone())
                    .or_default()
                    .push(skill.skill_id.clone());
            }
            by_id.insert(skill.skill_id.clone(), skill);
        }
        for list in dependents.values_mut() {
            list.sort();
            list.dedup();
        }

        Self {
            skills: by_id,
            dependents,
            default_skill_id,
        }
    }

    pub fn skill(&self, skill_id: &str) -> Option<&Skill> {
        self.skills.get(skill_id)
    }

    pub fn contains(&self, skill_id: &str) -> bool {
        self.skills.contains_key(skill_id)
    }

    /// Skills in skill id order.
    pub fn skills(&self) -> impl Iterator<Item = &Skill> {
        self.skills.values()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn default_skill_id(&self) -> &str {
        &self.default_skill_id
    }

    /// Maps unknown ids onto the catch-all skill.
    pub fn resolve_skill_id<'a>(&'a self, skill_id: &'a str) -> &'a str {
        if self.contains(skill_id) {
            skill_id
        } else {
            &self.default_skill_id
        }
    }

    /// All transitive prerequisites in depth-first pre-order, each listed once.
    pub fn get_skill_dependencies(&self, skill_id: &str) -> Vec<String> {
        if !self.contains(skill_id) {
            return Vec::new();
        }

        let mut visited = HashSet::new();
        let mut dependencies = Vec::new();
        self.collect_dependencies(skill_id, &mut visited, &mut dependencies);
        dependencies
    }

    fn collect_dependencies(
        &self,
        current: &str,
        visited: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) {
        if !visited.insert(current.to_string()) {
            return;
        }
        let Some(skill) = self.skills.get(current) else {
            return;
        };
        for prereq in &skill.prerequisites {
            if !visited.contains(prereq) {
                out.push(prereq.clone());
                self.collect_dependencies(prereq, visited, out);
            }
        }
    }

    /// Direct dependents only.
    pub fn get_skills_depending_on(&self, skill_id: &str) -> Vec<String> {
        self.dependents.get(skill_id).cloned().unwrap_or_default()
    }

    pub fn has_dependents(&self, skill_id: &str) -> bool {
        self.dependents
            .get(skill_id)
            .is_some_and(|list| !list.is_empty())
    }

    /// Skills below `threshold` whose prerequisites all reach it, easiest first.
    /// Skills missing from `masteries` count as 0.0.
    pub fn suggest_next_skills(
        &self,
        masteries: &BTreeMap<String, f64>,
        threshold: f64,
    ) -> Vec<String> {
        let mastery = |id: &str| masteries.get(id).copied().unwrap_or(0.0);

        let mut ready: Vec<&Skill> = self
            .skills
            .values()
            .filter(|skill| mastery(&skill.skill_id) < threshold)
            .filter(|skill| {
                skill
                    .prerequisites
                    .iter()
                    .all(|prereq| mastery(prereq) >= threshold)
            })
            .collect();

        ready.sort_by(|a, b| {
            a.difficulty
                .total_cmp(&b.difficulty)
                .then_with(|| a.skill_id.cmp(&b.skill_id))
        });

        ready.into_iter().map(|s| s.skill_id.clone()).collect()
    }
}

impl Default for SkillGraph {
    fn default() -> Self {
        Self::nixos()
    }
}

fn validate(skills: &[Skill]) -> Result<(), GraphError> {
    if skills.is_empty() {
        return Err(GraphError::Empty);
    }

    let mut ids = HashSet::new();
    for skill in skills {
        if !ids.insert(skill.skill_id.as_str()) {
            return Err(GraphError::DuplicateSkill(skill.skill_id.clone()));
        }
        if !(0.0..=1.0).contains(&skill.difficulty) {
            return Err(GraphError::InvalidDifficulty(skill.skill_id.clone()));
        }
    }

    for skill in skills {
        for prereq in &skill.prerequisites {
            if !ids.contains(prereq.as_str()) {
                return Err(GraphError::UnknownPrerequisite {
                    skill: skill.skill_id.clone(),
                    prerequisite: prereq.clone(),
                });
            }
        }
    }

    let edges: HashMap<&str, &[String]> = skills
        .iter()
        .map(|s| (s.skill_id.as_str(), s.prerequisites.as_slice()))
        .collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for skill in skills {
        visit(skill.skill_id.as_str(), &edges, &mut marks)?;
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

fn visit<'a>(
    id: &'a str,
    edges: &HashMap<&'a str, &'a [String]>,
    marks: &mut HashMap<&'a str, Mark>,
) -> Result<(), GraphError> {
    match marks.get(id) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => return Err(GraphError::Cycle(id.to_string())),
        None => {}
    }
    marks.insert(id, Mark::InProgress);
    if let Some(&prereqs) = edges.get(id) {
        for prereq in prereqs {
            visit(prereq.as_str(), edges, marks)?;
        }
    }
    marks.insert(id, Mark::Done);
    Ok(())
}

/// `nix_basics` when present, otherwise the easiest root skill.
fn pick_default(skills: &[Skill]) -> Option<String> {
    if skills.iter().any(|s| s.skill_id == DEFAULT_SKILL_ID) {
        return Some(DEFAULT_SKILL_ID.to_string());
    }
    skills
        .iter()
        .filter(|s| s.prerequisites.is_empty())
        .min_by(|a, b| {
            a.difficulty
                .total_cmp(&b.difficulty)
                .then_with(|| a.skill_id.cmp(&b.skill_id))
        })
        .map(|s| s.skill_id.clone())
}

fn skill(
    skill_id: &str,
    name: &str,
    skill_type: SkillType,
    prerequisites: &[&str],
    difficulty: f64,
    learning_objectives: &[&str],
    examples: &[&str],
) -> Skill {
    let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    Skill {
        skill_id: skill_id.to_string(),
        name: name.to_string(),
        skill_type,
        prerequisites: owned(prerequisites),
        difficulty,
        learning_objectives: owned(learning_objectives),
        examples: owned(examples),
    }
}

fn nixos_skills() -> Vec<Skill> {
    vec![
        skill(
            "nix_basics",
            "Nix Package Manager Basics",
            SkillType::Concept,
            &[],
            0.1,
            &[
                "Understand declarative package management",
                "Know what Nix stores are",
            ],
            &["nix-env -i", "nix-store --query"],
        ),
        skill(
            "nixos_configuration",
            "NixOS System Configuration",
            SkillType::Concept,
            &["nix_basics"],
            0.3,
            &["Edit configuration.nix", "Understand system rebuilds"],
            &["nixos-rebuild switch", "configuration.nix editing"],
        ),
        skill(
            "nix_env",
            "nix-env Package Management",
            SkillType::Command,
            &["nix_basics"],
            0.2,
            &["Install packages imperatively", "Manage user environment"],
            &["nix-env -iA nixos.firefox", "nix-env --rollback"],
        ),
        skill(
            "nix_shell",
            "nix-shell Development Environments",
            SkillType::Command,
            &["nix_basics"],
            0.4,
            &["Create temporary environments", "Development workflows"],
            &["nix-shell -p python3", "nix-shell --run 'python --version'"],
        ),
        skill(
            "nixos_rebuild",
            "nixos-rebuild System Management",
            SkillType::Command,
            &["nixos_configuration"],
            0.5,
            &["Rebuild system safely", "Understand generations"],
            &[
                "nixos-rebuild switch",
                "nixos-rebuild test",
                "nixos-rebuild rollback",
            ],
        ),
        skill(
            "nix_store",
            "Nix Store Operations",
            SkillType::Command,
            &["nix_basics"],
            0.6,
            &["Query store", "Garbage collection"],
            &["nix-store --query --references", "nix-collect-garbage"],
        ),
        skill(
            "nix_expressions",
            "Nix Expression Language",
            SkillType::Concept,
            &["nix_basics"],
            0.7,
            &["Write Nix expressions", "Understand lazy evaluation"],
            &["{ pkgs ? import <nixpkgs> {} }: ...", "rec { ... }"],
        ),
        skill(
            "flakes",
            "Nix Flakes",
            SkillType::Architecture,
            &["nix_expressions", "nixos_configuration"],
            0.8,
            &["Create reproducible flakes", "Lock dependencies"],
            &["nix flake init", "flake.nix", "flake.lock"],
        ),
        skill(
            "nixos_modules",
            "NixOS Module System",
            SkillType::Architecture,
            &["nixos_configuration", "nix_expressions"],
            0.9,
            &["Create custom modules", "Understand option types"],
            &["services.nginx.enable", "types.str", "mkOption"],
        ),
        skill(
            "nix_debugging",
            "Nix Debugging and Troubleshooting",
            SkillType::Concept,
            &["nix_expressions"],
            0.6,
            &["Debug build failures", "Understand error messages"],
            &[
                "nix-build --show-trace",
                "Understanding infinite recursion errors",
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masteries(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_builtin_graph_is_valid_dag() {
        let skills: Vec<Skill> = SkillGraph::nixos().skills().cloned().collect();
        let rebuilt = SkillGraph::from_skills(skills).expect("builtin graph validates");
        assert_eq!(rebuilt.len(), 10);
        assert_eq!(rebuilt.default_skill_id(), DEFAULT_SKILL_ID);
    }

    #[test]
    fn test_transitive_dependencies_listed_once() {
        let graph = SkillGraph::nixos();
        let deps = graph.get_skill_dependencies("flakes");

        assert_eq!(
            deps,
            vec!["nix_expressions", "nix_basics", "nixos_configuration"]
        );
        assert!(graph.get_skill_dependencies("nix_basics").is_empty());
        assert!(graph.get_skill_dependencies("does_not_exist").is_empty());
    }

    #[test]
    fn test_direct_dependents_only() {
        let graph = SkillGraph::nixos();
        assert_eq!(
            graph.get_skills_depending_on("nix_expressions"),
            vec!["flakes", "nix_debugging", "nixos_modules"]
        );
        assert!(graph.get_skills_depending_on("flakes").is_empty());
        assert!(!graph
            .get_skills_depending_on("nix_basics")
            .contains(&"flakes".to_string()));
    }

    #[test]
    fn test_suggestions_respect_prerequisites_and_difficulty() {
        let graph = SkillGraph::nixos();
        let suggestions = graph.suggest_next_skills(&masteries(&[("nix_basics", 0.9)]), 0.7);

        assert_eq!(
            suggestions,
            vec![
                "nix_env",
                "nixos_configuration",
                "nix_shell",
                "nix_store",
                "nix_expressions"
            ]
        );
    }

    #[test]
    fn test_suggestions_start_with_roots_for_new_user() {
        let graph = SkillGraph::nixos();
        assert_eq!(
            graph.suggest_next_skills(&BTreeMap::new(), 0.7),
            vec!["nix_basics"]
        );
    }

    #[test]
    fn test_suggestion_ties_break_on_skill_id() {
        let graph = SkillGraph::nixos();
        let m = masteries(&[("nix_basics", 0.9), ("nix_expressions", 0.9)]);
        let suggestions = graph.suggest_next_skills(&m, 0.7);
        let debugging = suggestions.iter().position(|s| s == "nix_debugging").unwrap();
        let store = suggestions.iter().position(|s| s == "nix_store").unwrap();
        assert!(debugging < store, "0.6 tie should order nix_debugging first");
    }

    #[test]
    fn test_cycle_rejected() {
        let a = skill("a", "A", SkillType::Concept, &["b"], 0.1, &[], &[]);
        let b = skill("b", "B", SkillType::Concept, &["a"], 0.2, &[], &[]);
        let err = SkillGraph::from_skills(vec![a, b]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn test_unknown_prerequisite_and_bad_difficulty_rejected() {
        let a = skill("a", "A", SkillType::Concept, &["ghost"], 0.1, &[], &[]);
        assert!(matches!(
            SkillGraph::from_skills(vec![a]).unwrap_err(),
            GraphError::UnknownPrerequisite { .. }
        ));

        let b = skill("b", "B", SkillType::Concept, &[], 1.5, &[], &[]);
        assert!(matches!(
            SkillGraph::from_skills(vec![b]).unwrap_err(),
            GraphError::InvalidDifficulty(_)
        ));

        assert!(matches!(
            SkillGraph::from_skills(Vec::new()).unwrap_err(),
            GraphError::Empty
        ));
    }

    #[test]
    fn test_custom_graph_default_is_easiest_root() {
        let hard = skill("zeta", "Z", SkillType::Concept, &[], 0.5, &[], &[]);
        let easy = skill("alpha", "A", SkillType::Command, &[], 0.2, &[], &[]);
        let leaf = skill("leaf", "L", SkillType::Command, &["alpha"], 0.0, &[], &[]);
        let graph = SkillGraph::from_skills(vec![hard, easy, leaf]).unwrap();

        assert_eq!(graph.default_skill_id(), "alpha");
        assert_eq!(graph.resolve_skill_id("missing"), "alpha");
        assert_eq!(graph.resolve_skill_id("zeta"), "zeta");
    }
}
