//! Periodic processor: claims due enrollments in bounded batches and runs
//! the step executor on each with bounded parallelism.

use std::sync::Arc;

use campaign_core::clock::Clock;
use campaign_core::config::SchedulerConfig;
use campaign_core::error::DripResult;
use campaign_core::types::TickSummary;
use chrono::Duration;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::executor::StepExecutor;
use crate::store::DripStore;

pub struct DripScheduler {
    store: Arc<dyn DripStore>,
    executor: Arc<StepExecutor>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    worker_id: String,
}

impl DripScheduler {
    pub fn new(
        store: Arc<dyn DripStore>,
        executor: Arc<StepExecutor>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            config,
            worker_id: worker_id.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn lease(&self) -> Duration {
        Duration::seconds(self.config.lease_ttl_secs.min(u64::from(u32::MAX)) as i64)
    }

    /// One tick. Claims at most `batch_size` due enrollments and executes
    /// them; per-item failures are counted, never propagated. Only a failed
    /// claim query fails the tick.
    pub async fn process_pending_steps(&self) -> DripResult<TickSummary> {
        let now = self.clock.now();
        let claimed = self
            .store
            .claim_due(now, self.config.batch_size, &self.worker_id, self.lease())?;

        metrics::counter!("drip.scheduler.ticks").increment(1);
        metrics::counter!("drip.scheduler.claimed").increment(claimed.len() as u64);

        let total = claimed.len();
        if total == 0 {
            debug!(worker = %self.worker_id, "No due enrollments");
            return Ok(TickSummary::default());
        }

        let results: Vec<bool> = stream::iter(claimed)
            .map(|enrollment| {
                let executor = Arc::clone(&self.executor);
                async move {
                    let enrollment_id = enrollment.id;
                    match executor.execute_claimed(enrollment).await {
                        Ok(outcome) => {
                            debug!(enrollment_id = %enrollment_id, ?outcome, "Enrollment processed");
                            true
                        }
                        Err(err) if err.is_per_item() => {
                            warn!(enrollment_id = %enrollment_id, error = %err, "Enrollment step failed");
                            false
                        }
                        Err(err) => {
                            error!(enrollment_id = %enrollment_id, error = %err, "Enrollment step errored");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.config.max_parallel.max(1))
            .collect()
            .await;

        let processed = results.iter().filter(|ok| **ok).count();
        let summary = TickSummary {
            processed,
            failed: total - processed,
            total,
        };

        info!(
            worker = %self.worker_id,
            processed = summary.processed,
            failed = summary.failed,
            total = summary.total,
            "Scheduler tick finished"
        );
        Ok(summary)
    }

    /// Run ticks every `interval_secs` until `shutdown` flips to true.
    /// Ticks in one process never overlap; a slow tick delays the next one.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = std::time::Duration::from_secs(self.config.interval_secs.max(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                worker = %self.worker_id,
                interval_secs = period.as_secs(),
                batch_size = self.config.batch_size,
                max_parallel = self.config.max_parallel,
                "Drip scheduler started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = self.process_pending_steps().await {
                            error!(worker = %self.worker_id, error = %err, "Scheduler tick failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!(worker = %self.worker_id, "Drip scheduler stopping");
                            return;
                        }
                    }
                }
            }
        })
    }
}
