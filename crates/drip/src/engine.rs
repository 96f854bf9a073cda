use std::sync::Arc;
use std::time::Duration as StdDuration;

use campaign_channels::adapter::ChannelRegistry;
use campaign_channels::dispatcher::ChannelDispatcher;
use campaign_channels::survey::{HostedSurveyLinks, SurveyUrlGenerator};
use campaign_channels::throttle::ChannelThrottle;
use campaign_core::clock::{system_clock, Clock};
use campaign_core::config::{AppConfig, SchedulerConfig};
use campaign_core::error::DripResult;
use campaign_core::event_bus::{noop_sink, EventSink, TracingSink};
use campaign_core::types::{
    Campaign, CampaignStats, Channel, Delay, EnrollSummary, Enrollment, MediaRef, Recipient,
    Step, StepExecution, TickSummary,
};
use chrono::Duration;
use tracing::info;
use uuid::Uuid;

use crate::enrollment::EnrollmentManager;
use crate::executor::{StepExecutor, StepOutcome};
use crate::lifecycle::CampaignLifecycle;
use crate::listener::ResponseListener;
use crate::scheduler::DripScheduler;
use crate::stats::campaign_stats;
use crate::store::{DripStore, InMemoryStore};

/// Wires the store, dispatcher and clock into every drip component and
/// exposes the operations the API and the binary call.
#[derive(Clone)]
pub struct DripEngine {
    store: Arc<dyn DripStore>,
    enrollments: Arc<EnrollmentManager>,
    executor: Arc<StepExecutor>,
    scheduler: Arc<DripScheduler>,
    listener: Arc<ResponseListener>,
    lifecycle: Arc<CampaignLifecycle>,
}

impl std::fmt::Debug for DripEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DripEngine")
            .field("worker_id", &self.scheduler.worker_id())
            .finish()
    }
}

pub struct DripEngineBuilder {
    store: Arc<dyn DripStore>,
    registry: ChannelRegistry,
    throttle: Arc<ChannelThrottle>,
    survey_links: Arc<dyn SurveyUrlGenerator>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    scheduler: SchedulerConfig,
    worker_id: String,
}

impl Default for DripEngineBuilder {
    fn default() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            registry: ChannelRegistry::new(),
            throttle: Arc::new(ChannelThrottle::unlimited()),
            survey_links: Arc::new(HostedSurveyLinks::new("https://forms.example.com")),
            clock: system_clock(),
            event_sink: noop_sink(),
            scheduler: SchedulerConfig::default(),
            worker_id: "node-01".to_string(),
        }
    }
}

impl DripEngineBuilder {
    pub fn store(mut self, store: Arc<dyn DripStore>) -> Self {
        self.store = store;
        self
    }

    pub fn registry(mut self, registry: ChannelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn throttle(mut self, throttle: ChannelThrottle) -> Self {
        self.throttle = Arc::new(throttle);
        self
    }

    pub fn survey_links(mut self, links: Arc<dyn SurveyUrlGenerator>) -> Self {
        self.survey_links = links;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn build(self) -> DripEngine {
        let lease = Duration::seconds(self.scheduler.lease_ttl_secs.min(u64::from(u32::MAX)) as i64);
        let dispatcher = Arc::new(ChannelDispatcher::new(
            self.registry,
            self.throttle,
            StdDuration::from_millis(self.scheduler.dispatch_timeout_ms.max(1)),
        ));

        let executor = Arc::new(
            StepExecutor::new(
                self.store.clone(),
                dispatcher,
                self.survey_links,
                self.clock.clone(),
            )
            .with_event_sink(self.event_sink.clone())
            .with_worker(self.worker_id.clone(), lease),
        );
        let scheduler = Arc::new(DripScheduler::new(
            self.store.clone(),
            executor.clone(),
            self.clock.clone(),
            self.scheduler,
            self.worker_id,
        ));
        let enrollments = Arc::new(
            EnrollmentManager::new(self.store.clone(), self.clock.clone())
                .with_event_sink(self.event_sink.clone()),
        );
        let listener = Arc::new(
            ResponseListener::new(self.store.clone(), self.clock.clone())
                .with_event_sink(self.event_sink.clone()),
        );
        let lifecycle = Arc::new(
            CampaignLifecycle::new(self.store.clone(), self.clock)
                .with_event_sink(self.event_sink),
        );

        DripEngine {
            store: self.store,
            enrollments,
            executor,
            scheduler,
            listener,
            lifecycle,
        }
    }
}

impl DripEngine {
    pub fn builder() -> DripEngineBuilder {
        DripEngineBuilder::default()
    }

    /// Production wiring: in-memory store, the four provider adapters,
    /// configured rate limits, hosted survey links, wall clock, and events
    /// written to the log.
    pub fn from_config(config: &AppConfig) -> Self {
        info!(node_id = %config.node_id, "Building drip engine from configuration");
        Self::builder()
            .registry(ChannelRegistry::from_config(&config.channels))
            .throttle(ChannelThrottle::from_config(&config.channels.rate_limits))
            .survey_links(Arc::new(HostedSurveyLinks::new(
                config.channels.survey_base_url.clone(),
            )))
            .event_sink(Arc::new(TracingSink))
            .scheduler_config(config.scheduler.clone())
            .worker_id(config.node_id.clone())
            .build()
    }

    pub fn store(&self) -> &Arc<dyn DripStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<DripScheduler> {
        &self.scheduler
    }

    pub fn executor(&self) -> &Arc<StepExecutor> {
        &self.executor
    }

    pub fn create_campaign(&self, campaign: Campaign, steps: Vec<Step>) -> DripResult<Uuid> {
        let id = campaign.id;
        info!(campaign_id = %id, name = %campaign.name, steps = steps.len(), "Creating campaign");
        self.store.insert_campaign(campaign, steps)?;
        Ok(id)
    }

    pub fn get_campaign(&self, id: Uuid) -> Option<Campaign> {
        self.store.get_campaign(id)
    }

    pub fn steps(&self, campaign_id: Uuid) -> Vec<Step> {
        self.store.steps(campaign_id)
    }

    pub fn enroll(&self, campaign_id: Uuid, recipients: &[Recipient]) -> DripResult<EnrollSummary> {
        self.enrollments.enroll(campaign_id, recipients)
    }

    pub fn start_campaign(&self, campaign_id: Uuid) -> DripResult<Campaign> {
        self.lifecycle.start(campaign_id)
    }

    pub fn pause_campaign(&self, campaign_id: Uuid) -> DripResult<Campaign> {
        self.lifecycle.pause(campaign_id)
    }

    pub fn resume_campaign(&self, campaign_id: Uuid) -> DripResult<Campaign> {
        self.lifecycle.resume(campaign_id)
    }

    pub async fn execute_next_step(&self, enrollment_id: Uuid) -> DripResult<StepOutcome> {
        self.executor.execute_next_step(enrollment_id).await
    }

    pub async fn process_pending_steps(&self) -> DripResult<TickSummary> {
        self.scheduler.process_pending_steps().await
    }

    pub fn mark_responded(&self, form_id: &str, identifier: &str) -> usize {
        self.listener.mark_responded(form_id, identifier)
    }

    pub fn stats(&self, campaign_id: Uuid) -> DripResult<CampaignStats> {
        campaign_stats(self.store.as_ref(), campaign_id)
    }

    pub fn enrollment(&self, id: Uuid) -> Option<Enrollment> {
        self.store.get_enrollment(id)
    }

    pub fn enrollments(&self, campaign_id: Uuid) -> Vec<Enrollment> {
        self.store.enrollments_for_campaign(campaign_id)
    }

    pub fn executions_for(&self, enrollment_id: Uuid) -> Vec<StepExecution> {
        self.store.executions_for(enrollment_id)
    }

    /// Seeds and starts a three-step email follow-up campaign for local
    /// development. Returns its id.
    pub fn seed_demo_campaign(&self) -> DripResult<Uuid> {
        info!("Seeding demo campaign");

        let campaign = Campaign::new(Uuid::nil(), "demo-nps", "Post-purchase NPS", Channel::Email)
            .with_max_reminders(2);
        let id = campaign.id;
        let steps = vec![
            Step::new(
                id,
                1,
                "Hi {{name}}, how likely are you to recommend us? {{survey_url}}",
                Delay::immediate(),
            )
            .with_subject("Two minutes, {{name}}?"),
            Step::new(
                id,
                2,
                "Quick reminder, your feedback helps: {{survey_url}}",
                Delay::days(2),
            )
            .with_subject("Still have a minute?"),
            Step::new(
                id,
                3,
                "Last chance to tell us how we did: {{survey_url}}",
                Delay::days(4),
            )
            .with_subject("Last call for feedback")
            .with_media(MediaRef {
                url: "https://cdn.example.com/nps-banner.png".to_string(),
                mime_type: Some("image/png".to_string()),
            }),
        ];

        self.create_campaign(campaign, steps)?;
        self.start_campaign(id)?;
        Ok(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use campaign_core::clock::ManualClock;
    use campaign_core::config::ChannelsConfig;
    use campaign_core::types::{CampaignStatus, EnrollmentStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn test_demo_campaign_runs_through_provider_adapters() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = DripEngine::builder()
            .registry(ChannelRegistry::from_config(&ChannelsConfig::default()))
            .clock(clock.clone())
            .build();

        let id = engine.seed_demo_campaign().unwrap();
        assert_eq!(engine.get_campaign(id).unwrap().status(), CampaignStatus::Active);
        assert_eq!(engine.steps(id).len(), 3);

        let summary = engine
            .enroll(id, &[Recipient::with_email("ana@example.com").named("Ana")])
            .unwrap();
        assert_eq!(summary.enrolled, 1);

        let tick = engine.process_pending_steps().await.unwrap();
        assert_eq!(tick, TickSummary { processed: 1, failed: 0, total: 1 });

        let enrollment = &engine.enrollments(id)[0];
        assert_eq!(enrollment.current_step, 1);
        assert_eq!(enrollment.status(), EnrollmentStatus::Active);
        assert_eq!(engine.executions_for(enrollment.id).len(), 1);

        assert_eq!(engine.mark_responded("demo-nps", "ana@example.com"), 1);
        let stats = engine.stats(id).unwrap();
        assert_eq!(stats.stopped, 1);
        assert_eq!(stats.responded, 1);
    }

    #[test]
    fn test_from_config_uses_node_id_as_worker() {
        let config = AppConfig {
            node_id: "drip-7".to_string(),
            ..Default::default()
        };
        let engine = DripEngine::from_config(&config);
        assert_eq!(engine.scheduler().worker_id(), "drip-7");
        assert_eq!(engine.scheduler().config().batch_size, 100);
    }
}
