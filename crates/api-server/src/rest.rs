//! Operational endpoints and the shared error body.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use campaign_core::error::DripError;
use campaign_drip::DripEngine;
use serde::Serialize;
use tracing::error;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: DripEngine,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: DripEngine, node_id: impl Into<String>) -> Self {
        Self {
            engine,
            node_id: node_id.into(),
            start_time: Instant::now(),
        }
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready. The engine is built before the router, so a served request
/// means the scheduler and store are in place.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// A `DripError` on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub DripError);

impl From<DripError> for ApiError {
    fn from(err: DripError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            DripError::CampaignNotFound(_) | DripError::EnrollmentNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            DripError::CampaignNotReady { .. } => (StatusCode::CONFLICT, "campaign_not_ready"),
            DripError::NotFoundOrWrongState { .. } => {
                (StatusCode::CONFLICT, "not_found_or_wrong_state")
            }
            DripError::ClaimLost(_) => (StatusCode::CONFLICT, "claim_lost"),
            DripError::InvalidCampaign(_) => (StatusCode::BAD_REQUEST, "invalid_campaign"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
        }
        let message = if status.is_server_error() {
            "Internal processing error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}
