//! Guarded campaign lifecycle edges: start, pause, resume.

use std::sync::Arc;

use campaign_core::clock::Clock;
use campaign_core::error::DripResult;
use campaign_core::event_bus::{make_event, DripEventType, EventSink};
use campaign_core::types::{Campaign, CampaignTransition};
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::DripStore;

pub struct CampaignLifecycle {
    store: Arc<dyn DripStore>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl CampaignLifecycle {
    pub fn new(store: Arc<dyn DripStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            event_sink: campaign_core::event_bus::noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// draft → active
    pub fn start(&self, campaign_id: Uuid) -> DripResult<Campaign> {
        self.apply(campaign_id, CampaignTransition::Start)
    }

    /// active → paused. Enrollments already claimed by a running tick still
    /// finish their step.
    pub fn pause(&self, campaign_id: Uuid) -> DripResult<Campaign> {
        self.apply(campaign_id, CampaignTransition::Pause)
    }

    /// paused → active
    pub fn resume(&self, campaign_id: Uuid) -> DripResult<Campaign> {
        self.apply(campaign_id, CampaignTransition::Resume)
    }

    pub fn apply(&self, campaign_id: Uuid, transition: CampaignTransition) -> DripResult<Campaign> {
        let campaign = self
            .store
            .transition_campaign(campaign_id, transition, self.clock.now())
            .inspect_err(|err| {
                warn!(campaign_id = %campaign_id, ?transition, error = %err, "Campaign transition rejected");
            })?;

        info!(
            campaign_id = %campaign_id,
            ?transition,
            status = ?transition.target_status(),
            "Campaign transitioned"
        );
        let event_type = match transition {
            CampaignTransition::Start => DripEventType::CampaignStarted,
            CampaignTransition::Pause => DripEventType::CampaignPaused,
            CampaignTransition::Resume => DripEventType::CampaignResumed,
        };
        self.event_sink.emit(make_event(event_type, campaign_id));
        Ok(campaign)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use campaign_core::clock::ManualClock;
    use campaign_core::error::DripError;
    use campaign_core::event_bus::capture_sink;
    use campaign_core::types::{CampaignStatus, Channel, Delay, Step};
    use chrono::{Duration, Utc};

    #[test]
    fn test_full_cycle_and_guards() {
        let store = Arc::new(InMemoryStore::new());
        let campaign = Campaign::new(Uuid::new_v4(), "f", "c", Channel::Telegram);
        let id = campaign.id;
        store
            .insert_campaign(campaign, vec![Step::new(id, 1, "x", Delay::immediate())])
            .unwrap();

        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let sink = capture_sink();
        let lifecycle = CampaignLifecycle::new(store.clone(), clock.clone()).with_event_sink(sink.clone());

        let guard = |r: DripResult<Campaign>| {
            matches!(r, Err(DripError::NotFoundOrWrongState { .. }))
        };
        assert!(guard(lifecycle.pause(id)));
        assert!(guard(lifecycle.resume(id)));

        assert_eq!(lifecycle.start(id).unwrap().started_at(), Some(start));
        assert!(guard(lifecycle.start(id)));
        assert!(guard(lifecycle.resume(id)));

        clock.advance(Duration::hours(1));
        assert_eq!(lifecycle.pause(id).unwrap().status(), CampaignStatus::Paused);
        assert!(guard(lifecycle.pause(id)));

        let resumed = lifecycle.resume(id).unwrap();
        assert_eq!(resumed.status(), CampaignStatus::Active);
        assert_eq!(resumed.started_at(), Some(start));

        assert!(guard(lifecycle.start(Uuid::new_v4())));
        assert_eq!(sink.count(), 3);
    }
}
