//! HTTP surface over the lifecycle engine.
//!
//! Handlers are thin: decode the request, call one engine operation,
//! map the error to a status code. All state checks live in the engine
//! and store, never here.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::error::EngineError;
use crate::lifecycle::{ElectionResult, Engine};
use crate::model::{
    AdminId, AssemblyId, CandidateId, ElectionId, EventId, EventWindows, MemberId, NominationId,
    NominationProfile, TallyOutcome, WardId,
};

pub struct AppState {
    pub engine: Engine,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Unauthorized(_) => StatusCode::FORBIDDEN,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::InvalidState(_) | EngineError::Validation(_) | EngineError::NoVotesCast => {
            StatusCode::BAD_REQUEST
        }
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("request failed: {}", e);
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "gramvote"
    }))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleEventRequest {
    pub assembly_id: i64,
    pub admin_id: i64,
    pub title: String,
    pub nomination_start: NaiveDateTime,
    pub nomination_end: NaiveDateTime,
    pub voting_start: NaiveDateTime,
    pub voting_end: NaiveDateTime,
    pub ward_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleEventResponse {
    pub event_id: i64,
    pub election_ids: Vec<i64>,
}

async fn schedule_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScheduleEventRequest>,
) -> Result<Json<ScheduleEventResponse>, ApiError> {
    let windows = EventWindows {
        nomination_start: req.nomination_start,
        nomination_end: req.nomination_end,
        voting_start: req.voting_start,
        voting_end: req.voting_end,
    };
    let ward_ids = req.ward_ids.into_iter().map(WardId).collect();

    let (event_id, election_ids) = state
        .engine
        .schedule_event(
            AssemblyId(req.assembly_id),
            AdminId(req.admin_id),
            req.title,
            windows,
            ward_ids,
        )
        .await
        .map_err(error_response)?;

    Ok(Json(ScheduleEventResponse {
        event_id: event_id.0,
        election_ids: election_ids.into_iter().map(|id| id.0).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ApplyNominationRequest {
    pub member_id: i64,
    pub bio: Option<String>,
    pub profile_photo_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApplyNominationResponse {
    pub nomination_id: i64,
    pub status: String,
}

async fn apply_nomination(
    State(state): State<Arc<AppState>>,
    Path(election_id): Path<i64>,
    Json(req): Json<ApplyNominationRequest>,
) -> Result<Json<ApplyNominationResponse>, ApiError> {
    let profile = NominationProfile {
        bio: req.bio,
        profile_photo_url: req.profile_photo_url,
    };
    let nomination = state
        .engine
        .apply_nomination(ElectionId(election_id), MemberId(req.member_id), profile)
        .await
        .map_err(error_response)?;

    Ok(Json(ApplyNominationResponse {
        nomination_id: nomination.nomination_id.0,
        status: nomination.status.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ApproveNominationRequest {
    pub admin_id: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApproveNominationResponse {
    pub candidate_id: i64,
}

async fn approve_nomination(
    State(state): State<Arc<AppState>>,
    Path(nomination_id): Path<i64>,
    Json(req): Json<ApproveNominationRequest>,
) -> Result<Json<ApproveNominationResponse>, ApiError> {
    let candidate_id = state
        .engine
        .approve_nomination(NominationId(nomination_id), AdminId(req.admin_id), req.notes)
        .await
        .map_err(error_response)?;

    Ok(Json(ApproveNominationResponse {
        candidate_id: candidate_id.0,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RejectNominationRequest {
    pub admin_id: i64,
    pub reason: String,
}

async fn reject_nomination(
    State(state): State<Arc<AppState>>,
    Path(nomination_id): Path<i64>,
    Json(req): Json<RejectNominationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .engine
        .reject_nomination(NominationId(nomination_id), AdminId(req.admin_id), &req.reason)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({ "status": "REJECTED" })))
}

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub member_id: i64,
    pub candidate_id: i64,
}

async fn cast_vote(
    State(state): State<Arc<AppState>>,
    Path(election_id): Path<i64>,
    Json(req): Json<CastVoteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .engine
        .cast_vote(
            ElectionId(election_id),
            MemberId(req.member_id),
            CandidateId(req.candidate_id),
        )
        .await
        .map_err(error_response)?;

    Ok(Json(json!({ "status": "recorded" })))
}

#[derive(Debug, Serialize)]
pub struct CalculateResponse {
    pub outcome: String,
    pub total_votes: Option<u64>,
    pub winners: Option<Vec<i64>>,
    pub winner_percentage: Option<f64>,
}

async fn calculate_result(
    State(state): State<Arc<AppState>>,
    Path(election_id): Path<i64>,
) -> Result<Json<CalculateResponse>, ApiError> {
    let outcome = state
        .engine
        .calculate_result(ElectionId(election_id))
        .await
        .map_err(error_response)?;

    let response = match outcome {
        TallyOutcome::Calculated(summary) => CalculateResponse {
            outcome: "calculated".to_string(),
            total_votes: Some(summary.total_votes),
            winners: Some(summary.winners.into_iter().map(|id| id.0).collect()),
            winner_percentage: Some(summary.winner_percentage),
        },
        TallyOutcome::AlreadyCalculated => CalculateResponse {
            outcome: "already_calculated".to_string(),
            total_votes: None,
            winners: None,
            winner_percentage: None,
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub admin_id: i64,
}

async fn publish_result(
    State(state): State<Arc<AppState>>,
    Path(election_id): Path<i64>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let published_at = state
        .engine
        .publish_result(ElectionId(election_id), AdminId(req.admin_id))
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "result_published": true,
        "result_published_at": published_at,
    })))
}

async fn unpublish_result(
    State(state): State<Arc<AppState>>,
    Path(election_id): Path<i64>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .engine
        .unpublish_result(ElectionId(election_id), AdminId(req.admin_id))
        .await
        .map_err(error_response)?;

    Ok(Json(json!({ "result_published": false })))
}

#[derive(Debug, Serialize)]
pub struct ElectionSummary {
    pub election_id: i64,
    pub ward_id: i64,
    pub title: String,
    pub status: String,
    pub total_votes: u64,
    pub result_calculated: bool,
    pub result_published: bool,
}

async fn elections_for_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> Result<Json<Vec<ElectionSummary>>, ApiError> {
    let store = state.engine.store();
    if store.get_event(EventId(event_id)).await.map_err(error_response)?.is_none() {
        return Err(error_response(EngineError::NotFound("event")));
    }
    let elections = store
        .elections_for_event(EventId(event_id))
        .await
        .map_err(error_response)?
        .into_iter()
        .map(|e| ElectionSummary {
            election_id: e.election_id.0,
            ward_id: e.ward_id.0,
            title: e.title,
            status: e.status.to_string(),
            total_votes: e.total_votes,
            result_calculated: e.result_calculated,
            result_published: e.result_published,
        })
        .collect();
    Ok(Json(elections))
}

async fn election_result(
    State(state): State<Arc<AppState>>,
    Path(election_id): Path<i64>,
) -> Result<Json<ElectionResult>, ApiError> {
    let result = state
        .engine
        .election_result(ElectionId(election_id))
        .await
        .map_err(error_response)?;
    Ok(Json(result))
}

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", post(schedule_event))
        .route("/events/:id/elections", get(elections_for_event))
        .route("/elections/:id/nominations", post(apply_nomination))
        .route("/nominations/:id/approve", post(approve_nomination))
        .route("/nominations/:id/reject", post(reject_nomination))
        .route("/elections/:id/votes", post(cast_vote))
        .route("/elections/:id/calculate", post(calculate_result))
        .route("/elections/:id/publish", post(publish_result))
        .route("/elections/:id/unpublish", post(unpublish_result))
        .route("/elections/:id/result", get(election_result))
}
