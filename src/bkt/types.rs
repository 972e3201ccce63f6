use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillType {
    Command,
    Function,
    Concept,
    Architecture,
}

impl SkillType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Function => "function",
            Self::Concept => "concept",
            Self::Architecture => "architecture",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "command" => Self::Command,
            "function" => Self::Function,
            "architecture" => Self::Architecture,
            _ => Self::Concept,
        }
    }
}

/// A node of the skill graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub skill_id: String,
    pub name: String,
    pub skill_type: SkillType,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// 0.0 (easy) to 1.0 (expert)
    pub difficulty: f64,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamKey {
    pub user_id: String,
    pub skill_id: String,
}

impl ParamKey {
    pub fn new(user_id: impl Into<String>, skill_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            skill_id: skill_id.into(),
        }
    }
}

/// Per (user, skill) tracing state.
///
/// - `prior_knowledge`: P(L0), mastery belief before any observation
/// - `learning_rate`: P(T), chance of learning from a practice opportunity
/// - `slip_probability`: P(S), failing despite mastery
/// - `guess_probability`: P(G), succeeding without mastery
/// - `current_mastery`: P(Lt), posterior belief after the latest observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BktParameters {
    pub user_id: String,
    pub skill_id: String,
    pub prior_knowledge: f64,
    pub learning_rate: f64,
    pub slip_probability: f64,
    pub guess_probability: f64,
    pub current_mastery: f64,
    pub confidence: f64,
    pub observation_count: i64,
    pub last_updated: DateTime<Utc>,
}

impl BktParameters {
    pub fn key(&self) -> ParamKey {
        ParamKey::new(self.user_id.clone(), self.skill_id.clone())
    }

    /// Clamps every probability-like field into [0, 1].
    pub fn sanitized(mut self) -> Self {
        self.prior_knowledge = clamp_probability(self.prior_knowledge);
        self.learning_rate = clamp_probability(self.learning_rate);
        self.slip_probability = clamp_probability(self.slip_probability);
        self.guess_probability = clamp_probability(self.guess_probability);
        self.current_mastery = clamp_probability(self.current_mastery);
        self.confidence = clamp_probability(self.confidence);
        self.observation_count = self.observation_count.max(0);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Typo,
    Conceptual,
    #[serde(other)]
    Other,
}

/// Metadata attached to an observation. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationContext {
    #[serde(default, alias = "error_type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(default, alias = "help_received")]
    pub help_received: bool,
    #[serde(
        default,
        alias = "response_time_ms",
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_time_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

impl ObservationContext {
    pub fn with_error_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = Some(error_type);
        self
    }

    pub fn with_help(mut self) -> Self {
        self.help_received = true;
        self
    }

    pub fn with_response_time_ms(mut self, millis: i64) -> Self {
        self.response_time_ms = Some(millis);
        self
    }
}

/// Accepts integers, floats (truncated) and numeric strings; everything else
/// becomes `None` instead of failing the whole payload.
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }))
}

/// One practice attempt. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillObservation {
    #[serde(default = "Uuid::new_v4")]
    pub observation_id: Uuid,
    pub skill_id: String,
    pub user_id: String,
    pub success: bool,
    #[serde(default)]
    pub context: ObservationContext,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_self_report: Option<f64>,
}

impl SkillObservation {
    pub fn new(
        user_id: impl Into<String>,
        skill_id: impl Into<String>,
        success: bool,
        context: ObservationContext,
    ) -> Self {
        Self {
            observation_id: Uuid::new_v4(),
            skill_id: skill_id.into(),
            user_id: user_id.into(),
            success,
            context,
            timestamp: Utc::now(),
            confidence_self_report: None,
        }
    }

    pub fn with_self_report(mut self, confidence: f64) -> Self {
        self.confidence_self_report = Some(clamp_probability(confidence));
        self
    }
}

/// An observation as it sits in the append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObservation {
    pub id: i64,
    #[serde(flatten)]
    pub observation: SkillObservation,
}

pub fn clamp_probability(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
