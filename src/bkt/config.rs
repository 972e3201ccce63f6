use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BktConfig {
    /// Mastery a skill (and its prerequisites) must reach to count as learned
    /// when suggesting what to study next.
    pub suggestion_threshold: f64,
    /// Skills below this mastery are knowledge-gap candidates.
    pub gap_threshold: f64,
    pub max_suggestions: usize,
    pub max_gaps: usize,
    /// Progress summary buckets: mastered at or above, beginning below.
    pub mastered_threshold: f64,
    pub learning_threshold: f64,
}

impl Default for BktConfig {
    fn default() -> Self {
        Self {
            suggestion_threshold: 0.7,
            gap_threshold: 0.5,
            max_suggestions: 5,
            max_gaps: 10,
            mastered_threshold: 0.8,
            learning_threshold: 0.3,
        }
    }
}

impl BktConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_probability("BKT_SUGGESTION_THRESHOLD") {
            config.suggestion_threshold = val;
        }
        if let Some(val) = env_probability("BKT_GAP_THRESHOLD") {
            config.gap_threshold = val;
        }
        if let Ok(val) = std::env::var("BKT_MAX_SUGGESTIONS") {
            config.max_suggestions = val.parse().unwrap_or(config.max_suggestions);
        }
        if let Ok(val) = std::env::var("BKT_MAX_GAPS") {
            config.max_gaps = val.parse().unwrap_or(config.max_gaps);
        }

        config
    }
}

fn env_probability(key: &str) -> Option<f64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| (0.0..=1.0).contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BktConfig::default();
        assert_eq!(config.suggestion_threshold, 0.7);
        assert_eq!(config.gap_threshold, 0.5);
        assert_eq!(config.max_suggestions, 5);
        assert_eq!(config.max_gaps, 10);
    }
}
