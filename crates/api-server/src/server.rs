//! API server: REST endpoints plus the Prometheus exporter.

use crate::drip_rest;
use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use campaign_core::config::AppConfig;
use campaign_drip::DripEngine;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Every route, with middleware, bound to `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Campaigns
        .route("/v1/campaigns/:id", get(drip_rest::get_campaign))
        .route("/v1/campaigns/:id/enroll", post(drip_rest::enroll))
        .route("/v1/campaigns/:id/start", post(drip_rest::start_campaign))
        .route("/v1/campaigns/:id/pause", post(drip_rest::pause_campaign))
        .route("/v1/campaigns/:id/resume", post(drip_rest::resume_campaign))
        .route("/v1/campaigns/:id/stats", get(drip_rest::campaign_stats))
        // Response events and manual ticks
        .route("/v1/responses", post(drip_rest::record_response))
        .route("/v1/scheduler/tick", post(drip_rest::run_tick))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    engine: DripEngine,
}

impl ApiServer {
    pub fn new(config: AppConfig, engine: DripEngine) -> Self {
        Self { config, engine }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState::new(self.engine.clone(), self.config.node_id.clone());
        let app = build_router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics exporter on its own port. The exporter runs on a
    /// background task owned by the installed recorder.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
