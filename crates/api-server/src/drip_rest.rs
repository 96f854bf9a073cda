//! Drip campaign REST endpoints: enrollment, lifecycle, stats, response
//! events and manual scheduler ticks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use campaign_core::error::DripError;
use campaign_core::types::{
    Campaign, CampaignStats, CampaignTransition, EnrollSummary, Recipient, Step, TickSummary,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::rest::{ApiError, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignView {
    pub campaign: Campaign,
    pub steps: Vec<Step>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub form_id: String,
    pub identifier: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseAck {
    pub stopped: usize,
}

/// GET /v1/campaigns/:id
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignView>, ApiError> {
    let campaign = state
        .engine
        .get_campaign(id)
        .ok_or(DripError::CampaignNotFound(id))?;
    Ok(Json(CampaignView {
        steps: state.engine.steps(id),
        campaign,
    }))
}

/// POST /v1/campaigns/:id/enroll
pub async fn enroll(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EnrollRequest>,
) -> Result<Json<EnrollSummary>, ApiError> {
    if state.engine.get_campaign(id).is_none() {
        return Err(DripError::CampaignNotFound(id).into());
    }
    let summary = state.engine.enroll(id, &request.recipients)?;
    Ok(Json(summary))
}

async fn transition(
    state: &AppState,
    id: Uuid,
    transition: CampaignTransition,
) -> Result<Json<Campaign>, ApiError> {
    let campaign = match transition {
        CampaignTransition::Start => state.engine.start_campaign(id)?,
        CampaignTransition::Pause => state.engine.pause_campaign(id)?,
        CampaignTransition::Resume => state.engine.resume_campaign(id)?,
    };
    Ok(Json(campaign))
}

/// POST /v1/campaigns/:id/start
pub async fn start_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    transition(&state, id, CampaignTransition::Start).await
}

/// POST /v1/campaigns/:id/pause
pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    transition(&state, id, CampaignTransition::Pause).await
}

/// POST /v1/campaigns/:id/resume
pub async fn resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    transition(&state, id, CampaignTransition::Resume).await
}

/// GET /v1/campaigns/:id/stats
pub async fn campaign_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignStats>, ApiError> {
    Ok(Json(state.engine.stats(id)?))
}

/// POST /v1/responses. Always accepted; the submission pipeline that calls
/// this must never see a failure from it.
pub async fn record_response(
    State(state): State<AppState>,
    Json(event): Json<ResponseEvent>,
) -> (StatusCode, Json<ResponseAck>) {
    let stopped = state.engine.mark_responded(&event.form_id, &event.identifier);
    (StatusCode::ACCEPTED, Json(ResponseAck { stopped }))
}

/// POST /v1/scheduler/tick
pub async fn run_tick(State(state): State<AppState>) -> Result<Json<TickSummary>, ApiError> {
    let summary = state.engine.process_pending_steps().await?;
    info!(
        processed = summary.processed,
        failed = summary.failed,
        "Manual scheduler tick"
    );
    Ok(Json(summary))
}
