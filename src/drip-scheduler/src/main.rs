//! Drip scheduler: multi-step follow-up campaigns across email, SMS,
//! WhatsApp and Telegram.
//!
//! Loads configuration, wires the channel adapters into the drip engine,
//! runs the periodic scheduler and serves the REST API.

use campaign_api::ApiServer;
use campaign_core::config::AppConfig;
use campaign_drip::DripEngine;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "drip-scheduler")]
#[command(about = "Multi-step outreach scheduler for survey follow-up campaigns")]
#[command(version)]
struct Cli {
    /// Node identifier, also used as the claim owner (overrides config)
    #[arg(long, env = "CAMPAIGN_DRIP__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_DRIP__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Scheduler wake interval in seconds (overrides config)
    #[arg(long, env = "CAMPAIGN_DRIP__SCHEDULER__INTERVAL_SECS")]
    interval_secs: Option<u64>,

    /// Maximum enrollments claimed per tick (overrides config)
    #[arg(long, env = "CAMPAIGN_DRIP__SCHEDULER__BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Seed and start a demo campaign on boot
    #[arg(long, default_value_t = false)]
    seed_demo: bool,

    /// Serve the API without running the periodic scheduler
    #[arg(long, default_value_t = false)]
    api_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "drip_scheduler=info,campaign_drip=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Drip scheduler starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(secs) = cli.interval_secs {
        config.scheduler.interval_secs = secs;
    }
    if let Some(batch) = cli.batch_size {
        config.scheduler.batch_size = batch;
    }
    if cli.api_only {
        config.scheduler.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        interval_secs = config.scheduler.interval_secs,
        batch_size = config.scheduler.batch_size,
        max_parallel = config.scheduler.max_parallel,
        "Configuration loaded"
    );

    let engine = DripEngine::from_config(&config);

    if cli.seed_demo {
        match engine.seed_demo_campaign() {
            Ok(id) => info!(campaign_id = %id, "Demo campaign seeded"),
            Err(e) => error!(error = %e, "Failed to seed demo campaign"),
        }
    }

    let api_server = ApiServer::new(config.clone(), engine.clone());
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = if config.scheduler.enabled {
        Some(Arc::clone(engine.scheduler()).spawn(shutdown_rx))
    } else {
        info!("Running in API-only mode (scheduler disabled)");
        None
    };

    info!("Drip scheduler is ready to serve traffic");

    tokio::select! {
        result = api_server.start_http() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }

    info!("Drip scheduler stopped");
    Ok(())
}
