//! Response listener: stops enrollments as soon as the recipient responds.
//!
//! Called from the form submission pipeline. It must never fail that
//! pipeline, so errors are logged and dropped here.

use std::sync::Arc;

use campaign_core::clock::Clock;
use campaign_core::event_bus::{make_event, DripEventType, EventSink};
use campaign_core::types::StopReason;
use tracing::{debug, info, warn};

use crate::store::DripStore;

pub struct ResponseListener {
    store: Arc<dyn DripStore>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl ResponseListener {
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

    /// Stop every active enrollment for `identifier` in stop-on-response
    /// campaigns fed by `form_id`. Returns how many were stopped.
    pub fn mark_responded(&self, form_id: &str, identifier: &str) -> usize {
        metrics::counter!("drip.responses.received").increment(1);

        if identifier.trim().is_empty() {
            debug!(form_id, "Response without identifier ignored");
            return 0;
        }

        let now = self.clock.now();
        let mut stopped_total = 0;

        for campaign in self.store.campaigns_for_form(form_id) {
            if !campaign.stop_on_response {
                continue;
            }

            let stopped = match self.store.record_response(campaign.id, identifier, now) {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(
                        campaign_id = %campaign.id,
                        form_id,
                        error = %err,
                        "Failed to record response, ignoring"
                    );
                    continue;
                }
            };
            if stopped.is_empty() {
                continue;
            }

            self.event_sink
                .emit(make_event(DripEventType::ResponseRecorded, campaign.id).with_detail(form_id));
            for enrollment_id in &stopped {
                self.event_sink.emit(
                    make_event(DripEventType::EnrollmentStopped, campaign.id)
                        .for_enrollment(*enrollment_id)
                        .with_detail(StopReason::UserResponded.as_str()),
                );
            }
            metrics::counter!(
                "drip.enrollments.stopped",
                "reason" => StopReason::UserResponded.as_str()
            )
            .increment(stopped.len() as u64);

            info!(
                campaign_id = %campaign.id,
                form_id,
                stopped = stopped.len(),
                "Recipient responded, enrollments stopped"
            );
            stopped_total += stopped.len();
        }

        stopped_total
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use campaign_core::clock::ManualClock;
    use campaign_core::event_bus::capture_sink;
    use campaign_core::types::{
        Campaign, CampaignTransition, Channel, Delay, Enrollment, EnrollmentStatus, Recipient,
        RecipientSnapshot, Step,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn campaign(store: &InMemoryStore, form_id: &str, stop_on_response: bool) -> Campaign {
        let campaign = Campaign::new(Uuid::new_v4(), form_id, "c", Channel::Email)
            .with_stop_on_response(stop_on_response);
        store
            .insert_campaign(
                campaign.clone(),
                vec![Step::new(campaign.id, 1, "x", Delay::immediate())],
            )
            .unwrap();
        store
            .transition_campaign(campaign.id, CampaignTransition::Start, Utc::now())
            .unwrap()
    }

    fn enroll(store: &InMemoryStore, campaign: &Campaign, recipient: Recipient) -> Uuid {
        let now = Utc::now();
        let enrollment =
            Enrollment::new(campaign.id, RecipientSnapshot::capture(&recipient, now), now, now);
        let id = enrollment.id;
        store.insert_enrollment(enrollment).unwrap();
        id
    }

    #[test]
    fn test_stops_matching_enrollments_only() {
        let store = Arc::new(InMemoryStore::new());
        let stopping = campaign(&store, "nps", true);
        let lenient = campaign(&store, "nps", false);
        let other_form = campaign(&store, "csat", true);

        let by_phone = enroll(
            &store,
            &stopping,
            Recipient {
                email: Some("ana@example.com".into()),
                phone: Some("+15550001".into()),
                ..Default::default()
            },
        );
        let bystander = enroll(&store, &stopping, Recipient::with_email("bo@example.com"));
        let kept = enroll(&store, &lenient, Recipient::with_phone("+15550001"));
        let elsewhere = enroll(&store, &other_form, Recipient::with_phone("+15550001"));

        let sink = capture_sink();
        let listener = ResponseListener::new(store.clone(), Arc::new(ManualClock::new(Utc::now())))
            .with_event_sink(sink.clone());
        assert_eq!(listener.mark_responded("nps", "+15550001"), 1);

        let stopped = store.get_enrollment(by_phone).unwrap();
        assert_eq!(stopped.status(), EnrollmentStatus::Stopped);
        assert_eq!(stopped.stopped_reason(), Some(StopReason::UserResponded));
        assert!(stopped.response_received);
        assert_eq!(stopped.next_step_at(), None);

        for id in [bystander, kept, elsewhere] {
            assert!(store.get_enrollment(id).unwrap().is_active());
        }
        assert_eq!(sink.count_type(DripEventType::ResponseRecorded), 1);
        assert_eq!(sink.count_type(DripEventType::EnrollmentStopped), 1);

        // Repeat responses are harmless.
        assert_eq!(listener.mark_responded("nps", "+15550001"), 0);
    }

    #[test]
    fn test_unknown_form_and_blank_identifier() {
        let store = Arc::new(InMemoryStore::new());
        let listener = ResponseListener::new(store, Arc::new(ManualClock::new(Utc::now())));
        assert_eq!(listener.mark_responded("missing", "a@b.c"), 0);
        assert_eq!(listener.mark_responded("missing", "  "), 0);
    }
}
