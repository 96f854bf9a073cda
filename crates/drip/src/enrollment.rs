//! Enrollment manager: admits recipients into an active campaign.

use std::sync::Arc;

use campaign_core::clock::Clock;
use campaign_core::delay::due_after;
use campaign_core::error::{DripError, DripResult};
use campaign_core::event_bus::{make_event, DripEventType, EventSink};
use campaign_core::types::{EnrollSummary, Enrollment, Recipient, RecipientSnapshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::DripStore;

pub struct EnrollmentManager {
    store: Arc<dyn DripStore>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl EnrollmentManager {
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

    /// Enroll each recipient independently. Fails as a whole only when the
    /// campaign cannot take enrollments; per-recipient problems are skips.
    pub fn enroll(&self, campaign_id: Uuid, recipients: &[Recipient]) -> DripResult<EnrollSummary> {
        let not_ready = |reason: &str| DripError::CampaignNotReady {
            campaign_id,
            reason: reason.to_string(),
        };

        let campaign = self
            .store
            .get_campaign(campaign_id)
            .ok_or_else(|| not_ready("campaign does not exist"))?;
        if !campaign.is_active() {
            return Err(not_ready(&format!("status is {:?}", campaign.status())));
        }
        let first_step = self
            .store
            .step(campaign_id, 1)
            .ok_or_else(|| not_ready("campaign has no steps"))?;

        let now = self.clock.now();
        let first_step_at = due_after(now, &first_step.delay);
        let mut summary = EnrollSummary {
            total: recipients.len(),
            ..Default::default()
        };

        for recipient in recipients {
            if recipient.identity().is_empty() {
                debug!(campaign_id = %campaign_id, "Recipient has no email or phone, skipping");
                summary.skipped += 1;
                continue;
            }

            let snapshot = RecipientSnapshot::capture(recipient, now);
            let enrollment = Enrollment::new(campaign_id, snapshot, first_step_at, now);
            let enrollment_id = enrollment.id;

            match self.store.insert_enrollment(enrollment) {
                Ok(()) => {
                    summary.enrolled += 1;
                    self.event_sink.emit(
                        make_event(DripEventType::EnrollmentCreated, campaign_id)
                            .for_enrollment(enrollment_id),
                    );
                }
                Err(DripError::DuplicateEnrollment { .. }) => {
                    debug!(campaign_id = %campaign_id, "Recipient already enrolled, skipping");
                    summary.skipped += 1;
                }
                Err(err) => {
                    warn!(campaign_id = %campaign_id, error = %err, "Failed to store enrollment, skipping recipient");
                    summary.skipped += 1;
                }
            }
        }

        if summary.enrolled > 0 {
            if let Err(err) = self.store.add_enrolled(campaign_id, summary.enrolled as u64) {
                warn!(campaign_id = %campaign_id, error = %err, "Failed to bump enrollment count");
            }
        }

        metrics::counter!("drip.enrollments.created").increment(summary.enrolled as u64);
        metrics::counter!("drip.enrollments.skipped").increment(summary.skipped as u64);
        info!(
            campaign_id = %campaign_id,
            enrolled = summary.enrolled,
            skipped = summary.skipped,
            total = summary.total,
            "Enrollment batch processed"
        );

        Ok(summary)
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
        Campaign, CampaignTransition, Channel, Delay, Step, StepExecution,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap()
    }

    fn setup(steps: usize, start: bool) -> (Arc<InMemoryStore>, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let campaign = Campaign::new(Uuid::new_v4(), "form-a", "Follow-up", Channel::Email);
        let id = campaign.id;
        let steps = (1..=steps as u32)
            .map(|n| Step::new(id, n, format!("step {n}"), Delay::hours(2)))
            .collect();
        store.insert_campaign(campaign, steps).unwrap();
        if start {
            store
                .transition_campaign(id, CampaignTransition::Start, t0())
                .unwrap();
        }
        (store, id)
    }

    fn manager(store: Arc<dyn DripStore>) -> EnrollmentManager {
        EnrollmentManager::new(store, Arc::new(ManualClock::new(t0())))
    }

    #[test]
    fn test_enroll_sets_first_due_time() {
        let (store, id) = setup(2, true);
        let sink = capture_sink();
        let summary = manager(store.clone())
            .with_event_sink(sink.clone())
            .enroll(id, &[Recipient::with_email("ana@example.com")])
            .unwrap();

        assert_eq!(summary, EnrollSummary { enrolled: 1, skipped: 0, total: 1 });
        let enrollment = &store.enrollments_for_campaign(id)[0];
        assert_eq!(enrollment.current_step, 0);
        assert_eq!(enrollment.next_step_at(), Some(t0() + Duration::hours(2)));
        assert_eq!(store.get_campaign(id).unwrap().enrollment_count, 1);
        assert_eq!(sink.count_type(DripEventType::EnrollmentCreated), 1);
    }

    #[test]
    fn test_huge_first_delay_enrolls_without_overflow() {
        let store = Arc::new(InMemoryStore::new());
        let campaign = Campaign::new(Uuid::new_v4(), "form-a", "Someday", Channel::Email);
        let id = campaign.id;
        store
            .insert_campaign(campaign, vec![Step::new(id, 1, "later", Delay::days(u32::MAX))])
            .unwrap();
        store
            .transition_campaign(id, CampaignTransition::Start, t0())
            .unwrap();

        let summary = manager(store.clone())
            .enroll(id, &[Recipient::with_email("ana@example.com")])
            .unwrap();
        assert_eq!(summary.enrolled, 1);

        let enrollment = &store.enrollments_for_campaign(id)[0];
        assert_eq!(enrollment.next_step_at(), Some(DateTime::<Utc>::MAX_UTC));
        assert!(store
            .claim_due(t0() + Duration::weeks(520), 10, "w", Duration::minutes(5))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_duplicates_and_blank_recipients_skip() {
        let (store, id) = setup(1, true);
        let recipients = vec![
            Recipient::with_email("ana@example.com"),
            Recipient {
                email: Some("ANA@example.com".into()),
                phone: Some("+15550001".into()),
                ..Default::default()
            },
            Recipient::with_phone("+15550002"),
            Recipient::default().named("nobody"),
        ];
        let summary = manager(store.clone()).enroll(id, &recipients).unwrap();
        assert_eq!(summary, EnrollSummary { enrolled: 2, skipped: 2, total: 4 });
        assert_eq!(store.enrollments_for_campaign(id).len(), 2);

        let again = manager(store.clone())
            .enroll(id, &[Recipient::with_phone("+15550002")])
            .unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(store.get_campaign(id).unwrap().enrollment_count, 2);
    }

    #[test]
    fn test_not_ready_campaigns_rejected() {
        let (store, empty) = setup(0, true);
        let err = manager(store.clone())
            .enroll(empty, &[Recipient::with_email("a@b.c")])
            .unwrap_err();
        assert!(matches!(err, DripError::CampaignNotReady { .. }));

        let (store, draft) = setup(1, false);
        let err = manager(store)
            .enroll(draft, &[Recipient::with_email("a@b.c")])
            .unwrap_err();
        assert!(matches!(err, DripError::CampaignNotReady { .. }));

        let (store, _) = setup(1, true);
        let err = manager(store)
            .enroll(Uuid::new_v4(), &[Recipient::with_email("a@b.c")])
            .unwrap_err();
        assert!(matches!(err, DripError::CampaignNotReady { .. }));
    }

    /// Store whose enrollment writes fail for one poisoned address.
    struct FlakyStore {
        inner: InMemoryStore,
        poisoned: String,
    }

    impl DripStore for FlakyStore {
        fn insert_campaign(&self, campaign: Campaign, steps: Vec<Step>) -> DripResult<()> {
            self.inner.insert_campaign(campaign, steps)
        }
        fn get_campaign(&self, id: Uuid) -> Option<Campaign> {
            self.inner.get_campaign(id)
        }
        fn campaigns_for_form(&self, form_id: &str) -> Vec<Campaign> {
            self.inner.campaigns_for_form(form_id)
        }
        fn steps(&self, campaign_id: Uuid) -> Vec<Step> {
            self.inner.steps(campaign_id)
        }
        fn step(&self, campaign_id: Uuid, step_number: u32) -> Option<Step> {
            self.inner.step(campaign_id, step_number)
        }
        fn transition_campaign(
            &self,
            id: Uuid,
            transition: CampaignTransition,
            now: DateTime<Utc>,
        ) -> DripResult<Campaign> {
            self.inner.transition_campaign(id, transition, now)
        }
        fn add_enrolled(&self, campaign_id: Uuid, count: u64) -> DripResult<()> {
            self.inner.add_enrolled(campaign_id, count)
        }
        fn add_completed(&self, campaign_id: Uuid) -> DripResult<()> {
            self.inner.add_completed(campaign_id)
        }
        fn insert_enrollment(&self, enrollment: Enrollment) -> DripResult<()> {
            if enrollment.recipient.email() == Some(self.poisoned.as_str()) {
                return Err(DripError::Storage("disk full".into()));
            }
            self.inner.insert_enrollment(enrollment)
        }
        fn get_enrollment(&self, id: Uuid) -> Option<Enrollment> {
            self.inner.get_enrollment(id)
        }
        fn enrollments_for_campaign(&self, campaign_id: Uuid) -> Vec<Enrollment> {
            self.inner.enrollments_for_campaign(campaign_id)
        }
        fn claim_due(
            &self,
            now: DateTime<Utc>,
            limit: usize,
            owner: &str,
            lease: Duration,
        ) -> DripResult<Vec<Enrollment>> {
            self.inner.claim_due(now, limit, owner, lease)
        }
        fn claim_enrollment(
            &self,
            id: Uuid,
            now: DateTime<Utc>,
            owner: &str,
            lease: Duration,
        ) -> DripResult<Enrollment> {
            self.inner.claim_enrollment(id, now, owner, lease)
        }
        fn finalize(&self, enrollment: &Enrollment, token: Uuid) -> DripResult<bool> {
            self.inner.finalize(enrollment, token)
        }
        fn release_claim(&self, enrollment_id: Uuid, token: Uuid) -> bool {
            self.inner.release_claim(enrollment_id, token)
        }
        fn record_response(
            &self,
            campaign_id: Uuid,
            identifier: &str,
            now: DateTime<Utc>,
        ) -> DripResult<Vec<Uuid>> {
            self.inner.record_response(campaign_id, identifier, now)
        }
        fn append_execution(&self, execution: StepExecution) -> DripResult<()> {
            self.inner.append_execution(execution)
        }
        fn executions_for(&self, enrollment_id: Uuid) -> Vec<StepExecution> {
            self.inner.executions_for(enrollment_id)
        }
        fn executions_for_campaign(&self, campaign_id: Uuid) -> Vec<StepExecution> {
            self.inner.executions_for_campaign(campaign_id)
        }
    }

    #[test]
    fn test_one_failing_recipient_does_not_abort_batch() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryStore::new(),
            poisoned: "bad@example.com".into(),
        });
        let campaign = Campaign::new(Uuid::new_v4(), "f", "c", Channel::Email);
        let id = campaign.id;
        store
            .insert_campaign(campaign, vec![Step::new(id, 1, "x", Delay::immediate())])
            .unwrap();
        store
            .transition_campaign(id, CampaignTransition::Start, t0())
            .unwrap();

        let summary = manager(store.clone())
            .enroll(
                id,
                &[
                    Recipient::with_email("ok1@example.com"),
                    Recipient::with_email("bad@example.com"),
                    Recipient::with_email("ok2@example.com"),
                ],
            )
            .unwrap();
        assert_eq!(summary, EnrollSummary { enrolled: 2, skipped: 1, total: 3 });
        assert_eq!(store.get_campaign(id).unwrap().enrollment_count, 2);
    }
}
