use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bkt::{
    BktExport, BktParameters, KnowledgeGap, ObservationContext, Skill, SkillObservation,
    SkillSuggestion,
};
use crate::response::{ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/interactions", post(record_interaction))
        .route("/observations", post(record_observation))
        .route("/skills", get(list_skills))
        .route("/skills/:skillId", get(get_skill))
        .route("/users/:userId", delete(reset_user))
        .route("/users/:userId/masteries", get(get_masteries))
        .route("/users/:userId/suggestions", get(get_suggestions))
        .route("/users/:userId/gaps", get(get_gaps))
        .route("/users/:userId/progress", get(get_progress))
        .route("/users/:userId/skills/:skillId", get(get_skill_report))
        .route("/users/:userId/export", get(export_user))
        .route("/users/:userId/import", post(import_user))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractionRequest {
    user_id: String,
    command: String,
    #[serde(default)]
    intent: String,
    success: bool,
    #[serde(default)]
    context: ObservationContext,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObservationRequest {
    user_id: String,
    skill_id: String,
    success: bool,
    #[serde(default)]
    context: ObservationContext,
    observation_id: Option<Uuid>,
    timestamp: Option<DateTime<Utc>>,
    confidence_self_report: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SuggestionQuery {
    threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MasteriesDto {
    user_id: String,
    masteries: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SuggestionsDto {
    user_id: String,
    threshold: f64,
    suggestions: Vec<SkillSuggestion>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GapsDto {
    user_id: String,
    gaps: Vec<KnowledgeGap>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SkillDetailDto {
    #[serde(flatten)]
    skill: Skill,
    dependencies: Vec<String>,
    dependents: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportResultDto {
    user_id: String,
    parameters: usize,
    observations: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetDto {
    user_id: String,
    reset: bool,
}

fn require_user_id(user_id: &str) -> Result<&str, AppError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("userId must not be empty"));
    }
    Ok(trimmed)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

async fn record_interaction(
    State(state): State<AppState>,
    payload: Result<Json<InteractionRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = body(payload)?;
    let user_id = require_user_id(&req.user_id)?;

    let params: Option<BktParameters> = state
        .tracer()
        .record_interaction_with_bkt(user_id, &req.command, &req.intent, req.success, req.context)
        .await;
    Ok(ok(params).into_response())
}

async fn record_observation(
    State(state): State<AppState>,
    payload: Result<Json<ObservationRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = body(payload)?;
    let user_id = require_user_id(&req.user_id)?;
    if req.skill_id.trim().is_empty() {
        return Err(AppError::validation("skillId must not be empty"));
    }

    let mut observation = SkillObservation::new(user_id, req.skill_id.trim(), req.success, req.context);
    if let Some(id) = req.observation_id {
        observation.observation_id = id;
    }
    if let Some(ts) = req.timestamp {
        observation.timestamp = ts;
    }
    if let Some(confidence) = req.confidence_self_report {
        observation = observation.with_self_report(confidence);
    }

    let params = state.tracer().update_mastery(observation).await;
    Ok(ok(params).into_response())
}

async fn list_skills(State(state): State<AppState>) -> Response {
    let tracer = state.tracer();
    let skills: Vec<Skill> = tracer.graph().skills().cloned().collect();
    ok(skills).into_response()
}

async fn get_skill(
    State(state): State<AppState>,
    Path(skill_id): Path<String>,
) -> Result<Response, AppError> {
    let tracer = state.tracer();
    let graph = tracer.graph();
    let skill = graph
        .skill(&skill_id)
        .cloned()
        .ok_or_else(|| AppError::not_found(format!("unknown skill: {skill_id}")))?;

    Ok(ok(SkillDetailDto {
        dependencies: graph.get_skill_dependencies(&skill_id),
        dependents: graph.get_skills_depending_on(&skill_id),
        skill,
    })
    .into_response())
}

async fn get_masteries(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let user_id = require_user_id(&user_id)?;
    let masteries = state.tracer().get_user_skill_masteries(user_id);
    Ok(ok(MasteriesDto {
        user_id: user_id.to_string(),
        masteries,
    })
    .into_response())
}

async fn get_suggestions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<SuggestionQuery>,
) -> Result<Response, AppError> {
    let user_id = require_user_id(&user_id)?;
    let tracer = state.tracer();
    let threshold = query
        .threshold
        .unwrap_or(tracer.config().suggestion_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(AppError::validation("threshold must be within [0, 1]"));
    }

    Ok(ok(SuggestionsDto {
        user_id: user_id.to_string(),
        threshold,
        suggestions: tracer.suggest_next_skills_for_user(user_id, threshold),
    })
    .into_response())
}

async fn get_gaps(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let user_id = require_user_id(&user_id)?;
    Ok(ok(GapsDto {
        user_id: user_id.to_string(),
        gaps: state.tracer().identify_knowledge_gaps(user_id),
    })
    .into_response())
}

async fn get_progress(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let user_id = require_user_id(&user_id)?;
    Ok(ok(state.tracer().get_learning_progress_summary(user_id)).into_response())
}

async fn get_skill_report(
    State(state): State<AppState>,
    Path((user_id, skill_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let user_id = require_user_id(&user_id)?;
    let report = state
        .tracer()
        .get_skill_report(user_id, &skill_id)
        .ok_or_else(|| AppError::not_found(format!("unknown skill: {skill_id}")))?;
    Ok(ok(report).into_response())
}

async fn export_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let user_id = require_user_id(&user_id)?;
    Ok(ok(state.tracer().export_bkt_data(user_id).await).into_response())
}

async fn import_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    payload: Result<Json<BktExport>, JsonRejection>,
) -> Result<Response, AppError> {
    let user_id = require_user_id(&user_id)?;
    let export = body(payload)?;
    if export.user_id != user_id {
        return Err(AppError::validation(format!(
            "export belongs to {}, not {user_id}",
            export.user_id
        )));
    }

    let summary = state.tracer().import_bkt_data(&export).await?;
    Ok(ok(ImportResultDto {
        user_id: user_id.to_string(),
        parameters: summary.parameters,
        observations: summary.observations,
    })
    .into_response())
}

async fn reset_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let user_id = require_user_id(&user_id)?;
    state.tracer().reset_user_bkt_data(user_id).await;
    Ok(ok(ResetDto {
        user_id: user_id.to_string(),
        reset: true,
    })
    .into_response())
}
