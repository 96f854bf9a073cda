//! On-demand enrollment aggregates per campaign.

use std::collections::BTreeMap;

use campaign_core::error::{DripError, DripResult};
use campaign_core::types::{CampaignStats, EnrollmentStatus, ExecutionStatus, StepDeliveryStats};
use uuid::Uuid;

use crate::store::DripStore;

pub fn campaign_stats(store: &dyn DripStore, campaign_id: Uuid) -> DripResult<CampaignStats> {
    if store.get_campaign(campaign_id).is_none() {
        return Err(DripError::CampaignNotFound(campaign_id));
    }

    let enrollments = store.enrollments_for_campaign(campaign_id);
    let count = |status: EnrollmentStatus| {
        enrollments.iter().filter(|e| e.status() == status).count() as u64
    };

    let total = enrollments.len() as u64;
    let responded = enrollments.iter().filter(|e| e.response_received).count() as u64;
    let response_rate = if total == 0 {
        0.0
    } else {
        responded as f64 / total as f64
    };

    let mut steps: BTreeMap<u32, StepDeliveryStats> = BTreeMap::new();
    for execution in store.executions_for_campaign(campaign_id) {
        let entry = steps
            .entry(execution.step_number)
            .or_insert_with(|| StepDeliveryStats {
                step_number: execution.step_number,
                ..Default::default()
            });
        match execution.status {
            ExecutionStatus::Sent => entry.sent += 1,
            ExecutionStatus::Failed => entry.failed += 1,
        }
    }

    Ok(CampaignStats {
        campaign_id,
        total,
        active: count(EnrollmentStatus::Active),
        completed: count(EnrollmentStatus::Completed),
        stopped: count(EnrollmentStatus::Stopped),
        responded,
        response_rate,
        steps: steps.into_values().collect(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use campaign_core::types::{
        Campaign, CampaignTransition, Channel, Delay, Enrollment, Recipient, RecipientSnapshot,
        Step, StepExecution,
    };
    use chrono::Utc;

    #[test]
    fn test_counts_and_rate() {
        let store = InMemoryStore::new();
        let campaign = Campaign::new(Uuid::new_v4(), "nps", "c", Channel::Email);
        let id = campaign.id;
        let step = Step::new(id, 1, "x", Delay::immediate());
        let step_id = step.id;
        store.insert_campaign(campaign, vec![step]).unwrap();
        let now = Utc::now();
        store
            .transition_campaign(id, CampaignTransition::Start, now)
            .unwrap();

        for email in ["a@x.io", "b@x.io", "c@x.io", "d@x.io"] {
            let snapshot = RecipientSnapshot::capture(&Recipient::with_email(email), now);
            store
                .insert_enrollment(Enrollment::new(id, snapshot, now, now))
                .unwrap();
        }
        store.record_response(id, "b@x.io", now).unwrap();

        let enrollment_id = store.enrollments_for_campaign(id)[0].id;
        for status in [ExecutionStatus::Sent, ExecutionStatus::Failed, ExecutionStatus::Sent] {
            store
                .append_execution(StepExecution {
                    id: Uuid::new_v4(),
                    enrollment_id,
                    campaign_id: id,
                    step_id,
                    step_number: 1,
                    status,
                    provider_message_id: None,
                    scheduled_at: now,
                    sent_at: now,
                    error_message: None,
                })
                .unwrap();
        }

        let stats = campaign_stats(&store, id).unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.active, 3);
        assert_eq!(stats.stopped, 1);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.responded, 1);
        assert!((stats.response_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(
            stats.steps,
            vec![StepDeliveryStats {
                step_number: 1,
                sent: 2,
                failed: 1
            }]
        );
    }

    #[test]
    fn test_empty_and_unknown() {
        let store = InMemoryStore::new();
        let campaign = Campaign::new(Uuid::new_v4(), "nps", "c", Channel::Sms);
        let id = campaign.id;
        store.insert_campaign(campaign, vec![]).unwrap();

        let stats = campaign_stats(&store, id).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.response_rate, 0.0);
        assert!(matches!(
            campaign_stats(&store, Uuid::new_v4()),
            Err(DripError::CampaignNotFound(_))
        ));
    }
}
