//! Command/intent to skill mapping.
//!
//! The free-text classifier lives outside this crate; what it hands us is a
//! `(command, intent)` pair. This module turns that pair into a skill id with an
//! ordered rule table. First matching rule wins.

use crate::bkt::graph::DEFAULT_SKILL_ID;

pub trait SkillClassifier: Send + Sync {
    /// Never returns an empty id.
    fn identify_skill(&self, command: &str, intent: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Command,
    Intent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Contains(MatchField, String),
    Equals(MatchField, String),
}

impl Matcher {
    pub fn command_contains(needle: &str) -> Self {
        Self::Contains(MatchField::Command, needle.to_lowercase())
    }

    pub fn intent_contains(needle: &str) -> Self {
        Self::Contains(MatchField::Intent, needle.to_lowercase())
    }

    pub fn intent_is(value: &str) -> Self {
        Self::Equals(MatchField::Intent, value.to_lowercase())
    }

    fn matches(&self, command: &str, intent: &str) -> bool {
        let field = |f: MatchField| match f {
            MatchField::Command => command,
            MatchField::Intent => intent,
        };
        match self {
            Self::Contains(f, needle) => field(*f).contains(needle.as_str()),
            Self::Equals(f, value) => field(*f) == value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub skill_id: String,
    pub matchers: Vec<Matcher>,
}

#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
    fallback: String,
}

impl KeywordClassifier {
    pub fn new(fallback: impl Into<String>) -> Self {
        let fallback = fallback.into();
        Self {
            rules: Vec::new(),
            fallback: if fallback.trim().is_empty() {
                DEFAULT_SKILL_ID.to_string()
            } else {
                fallback
            },
        }
    }

    /// Appends a rule; it fires when any matcher hits.
    pub fn rule(mut self, skill_id: impl Into<String>, matchers: Vec<Matcher>) -> Self {
        self.rules.push(KeywordRule {
            skill_id: skill_id.into(),
            matchers,
        });
        self
    }

    /// Rule table for the built-in NixOS graph.
    ///
    /// `nix-build` maps to `nix_build`, which the built-in graph does not
    /// define; the tracer resolves it to the catch-all skill.
    pub fn nixos() -> Self {
        use Matcher as M;

        Self::new(DEFAULT_SKILL_ID)
            .rule(
                "nix_env",
                vec![M::command_contains("nix-env"), M::intent_is("install")],
            )
            .rule("nix_build", vec![M::command_contains("nix-build")])
            .rule("nix_shell", vec![M::command_contains("nix-shell")])
            .rule(
                "nixos_rebuild",
                vec![M::command_contains("nixos-rebuild"), M::intent_is("rebuild")],
            )
            .rule(
                "nix_store",
                vec![
                    M::command_contains("nix-collect-garbage"),
                    M::intent_contains("garbage"),
                ],
            )
            .rule(
                "nixos_configuration",
                vec![
                    M::command_contains("configuration.nix"),
                    M::intent_contains("config"),
                ],
            )
            .rule("flakes", vec![M::command_contains("flake")])
            .rule("nixos_modules", vec![M::command_contains("module")])
            .rule(
                "nix_debugging",
                vec![M::command_contains("error"), M::command_contains("debug")],
            )
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::nixos()
    }
}

impl SkillClassifier for KeywordClassifier {
    fn identify_skill(&self, command: &str, intent: &str) -> String {
        let command = command.to_lowercase();
        let intent = intent.to_lowercase();

        self.rules
            .iter()
            .find(|rule| rule.matchers.iter().any(|m| m.matches(&command, &intent)))
            .map(|rule| rule.skill_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.fallback.clone())
    }
}
