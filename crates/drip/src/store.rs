//! Persistence boundary for campaigns, steps, enrollments and the step
//! execution log.
//!
//! Every state change goes through a guarded operation: campaign lifecycle
//! edges are compare-and-swap on the current state, enrollment progress is
//! written back only by the holder of a live claim, and the "one active
//! enrollment per recipient" rule is enforced at insert time.

use std::collections::HashSet;

use campaign_core::error::{DripError, DripResult};
use campaign_core::types::{
    Campaign, CampaignTransition, Claim, Enrollment, StepExecution, Step, StopReason,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

pub trait DripStore: Send + Sync {
    // ── Definitions ──

    /// Register a campaign with its steps. Step numbers must be exactly
    /// `1..=steps.len()`.
    fn insert_campaign(&self, campaign: Campaign, steps: Vec<Step>) -> DripResult<()>;

    fn get_campaign(&self, id: Uuid) -> Option<Campaign>;

    fn campaigns_for_form(&self, form_id: &str) -> Vec<Campaign>;

    /// Steps ordered by step number.
    fn steps(&self, campaign_id: Uuid) -> Vec<Step>;

    fn step(&self, campaign_id: Uuid, step_number: u32) -> Option<Step>;

    /// Apply a lifecycle edge only if the campaign is in the edge's required
    /// prior state.
    fn transition_campaign(
        &self,
        id: Uuid,
        transition: CampaignTransition,
        now: DateTime<Utc>,
    ) -> DripResult<Campaign>;

    fn add_enrolled(&self, campaign_id: Uuid, count: u64) -> DripResult<()>;

    fn add_completed(&self, campaign_id: Uuid) -> DripResult<()>;

    // ── Enrollments ──

    /// Fails with `DuplicateEnrollment` when the recipient already has an
    /// active enrollment in the campaign.
    fn insert_enrollment(&self, enrollment: Enrollment) -> DripResult<()>;

    fn get_enrollment(&self, id: Uuid) -> Option<Enrollment>;

    fn enrollments_for_campaign(&self, campaign_id: Uuid) -> Vec<Enrollment>;

    /// Claim up to `limit` due enrollments of active campaigns, oldest due
    /// first. Enrollments under a live claim are skipped.
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        owner: &str,
        lease: Duration,
    ) -> DripResult<Vec<Enrollment>>;

    /// Claim one specific active enrollment regardless of its due time.
    fn claim_enrollment(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        owner: &str,
        lease: Duration,
    ) -> DripResult<Enrollment>;

    /// Write back an enrollment processed under claim `token` and drop the
    /// claim. Returns `Ok(false)` if the stored enrollment left the active
    /// state in the meantime (the stored state is kept). Fails with
    /// `ClaimLost` if another worker holds the enrollment now.
    fn finalize(&self, enrollment: &Enrollment, token: Uuid) -> DripResult<bool>;

    /// Drop claim `token` without changing anything else. No-op if the
    /// token no longer matches.
    fn release_claim(&self, enrollment_id: Uuid, token: Uuid) -> bool;

    /// Stop every active enrollment of the campaign whose recipient matches
    /// `identifier`, marking the response. Returns the stopped ids.
    fn record_response(
        &self,
        campaign_id: Uuid,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> DripResult<Vec<Uuid>>;

    // ── Execution log ──

    fn append_execution(&self, execution: StepExecution) -> DripResult<()>;

    fn executions_for(&self, enrollment_id: Uuid) -> Vec<StepExecution>;

    fn executions_for_campaign(&self, campaign_id: Uuid) -> Vec<StepExecution>;
}

/// DashMap-backed store. Each guarded operation holds the entry lock of the
/// row it changes, so checks and writes cannot interleave per row.
#[derive(Default)]
pub struct InMemoryStore {
    campaigns: DashMap<Uuid, Campaign>,
    steps: DashMap<Uuid, Vec<Step>>,
    enrollments: DashMap<Uuid, Enrollment>,
    /// (campaign, identity key) -> active enrollment id
    active_index: DashMap<(Uuid, String), Uuid>,
    executions: DashMap<Uuid, Vec<StepExecution>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("campaigns", &self.campaigns.len())
            .field("enrollments", &self.enrollments.len())
            .finish()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn unindex(&self, enrollment: &Enrollment) {
        for key in enrollment.recipient.identity().index_keys() {
            self.active_index
                .remove_if(&(enrollment.campaign_id, key), |_, id| *id == enrollment.id);
        }
    }
}

fn validate_steps(campaign_id: Uuid, steps: &[Step]) -> DripResult<()> {
    let mut numbers: Vec<u32> = steps.iter().map(|s| s.step_number).collect();
    numbers.sort_unstable();
    for (expected, actual) in (1u32..).zip(&numbers) {
        if expected != *actual {
            return Err(DripError::InvalidCampaign(format!(
                "campaign {campaign_id}: step numbers must be contiguous from 1, found {numbers:?}"
            )));
        }
    }
    if let Some(step) = steps.iter().find(|s| s.campaign_id != campaign_id) {
        return Err(DripError::InvalidCampaign(format!(
            "step {} belongs to campaign {}",
            step.step_number, step.campaign_id
        )));
    }
    Ok(())
}

impl DripStore for InMemoryStore {
    fn insert_campaign(&self, campaign: Campaign, mut steps: Vec<Step>) -> DripResult<()> {
        validate_steps(campaign.id, &steps)?;
        steps.sort_by_key(|s| s.step_number);
        debug!(campaign_id = %campaign.id, steps = steps.len(), "Storing campaign");
        self.steps.insert(campaign.id, steps);
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    fn get_campaign(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&id).map(|c| c.clone())
    }

    fn campaigns_for_form(&self, form_id: &str) -> Vec<Campaign> {
        self.campaigns
            .iter()
            .filter(|c| c.form_id == form_id)
            .map(|c| c.value().clone())
            .collect()
    }

    fn steps(&self, campaign_id: Uuid) -> Vec<Step> {
        self.steps
            .get(&campaign_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn step(&self, campaign_id: Uuid, step_number: u32) -> Option<Step> {
        self.steps.get(&campaign_id).and_then(|steps| {
            steps
                .iter()
                .find(|s| s.step_number == step_number)
                .cloned()
        })
    }

    fn transition_campaign(
        &self,
        id: Uuid,
        transition: CampaignTransition,
        now: DateTime<Utc>,
    ) -> DripResult<Campaign> {
        let wrong_state = || DripError::NotFoundOrWrongState {
            campaign_id: id,
            expected: transition.required_status(),
        };
        let mut campaign = self.campaigns.get_mut(&id).ok_or_else(wrong_state)?;
        let next = campaign.state.apply(transition, now).ok_or_else(wrong_state)?;
        campaign.state = next;
        campaign.updated_at = now;
        Ok(campaign.clone())
    }

    fn add_enrolled(&self, campaign_id: Uuid, count: u64) -> DripResult<()> {
        let mut campaign = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or(DripError::CampaignNotFound(campaign_id))?;
        campaign.enrollment_count += count;
        Ok(())
    }

    fn add_completed(&self, campaign_id: Uuid) -> DripResult<()> {
        let mut campaign = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or(DripError::CampaignNotFound(campaign_id))?;
        campaign.completed_count += 1;
        Ok(())
    }

    fn insert_enrollment(&self, enrollment: Enrollment) -> DripResult<()> {
        let keys = enrollment.recipient.identity().index_keys();
        if keys.is_empty() {
            return Err(DripError::Storage(
                "enrollment recipient has neither email nor phone".to_string(),
            ));
        }

        let mut reserved: Vec<(Uuid, String)> = Vec::with_capacity(keys.len());
        for key in keys {
            let index_key = (enrollment.campaign_id, key);
            let taken = match self.active_index.entry(index_key.clone()) {
                Entry::Occupied(_) => true,
                Entry::Vacant(slot) => {
                    slot.insert(enrollment.id);
                    false
                }
            };
            if taken {
                // Shard lock is released; roll back earlier reservations.
                for key in reserved {
                    self.active_index.remove_if(&key, |_, id| *id == enrollment.id);
                }
                return Err(DripError::DuplicateEnrollment {
                    campaign_id: enrollment.campaign_id,
                });
            }
            reserved.push(index_key);
        }

        self.enrollments.insert(enrollment.id, enrollment);
        Ok(())
    }

    fn get_enrollment(&self, id: Uuid) -> Option<Enrollment> {
        self.enrollments.get(&id).map(|e| e.clone())
    }

    fn enrollments_for_campaign(&self, campaign_id: Uuid) -> Vec<Enrollment> {
        self.enrollments
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .map(|e| e.value().clone())
            .collect()
    }

    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        owner: &str,
        lease: Duration,
    ) -> DripResult<Vec<Enrollment>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let active_campaigns: HashSet<Uuid> = self
            .campaigns
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.id)
            .collect();

        let mut candidates: Vec<(DateTime<Utc>, Uuid)> = self
            .enrollments
            .iter()
            .filter(|e| active_campaigns.contains(&e.campaign_id))
            .filter(|e| e.is_due(now) && !e.is_claimed(now))
            .filter_map(|e| e.next_step_at().map(|at| (at, e.id)))
            .collect();
        candidates.sort();

        let mut claimed = Vec::with_capacity(limit.min(candidates.len()));
        for (_, id) in candidates {
            if claimed.len() >= limit {
                break;
            }
            let Some(mut enrollment) = self.enrollments.get_mut(&id) else {
                continue;
            };
            // Re-check under the row lock; another worker may have won.
            if !enrollment.is_due(now) || enrollment.is_claimed(now) {
                continue;
            }
            enrollment.claim = Some(Claim::new(owner, now + lease));
            claimed.push(enrollment.clone());
        }
        Ok(claimed)
    }

    fn claim_enrollment(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        owner: &str,
        lease: Duration,
    ) -> DripResult<Enrollment> {
        let mut enrollment = self
            .enrollments
            .get_mut(&id)
            .ok_or(DripError::EnrollmentNotFound(id))?;
        if !enrollment.is_active() || enrollment.is_claimed(now) {
            return Err(DripError::ClaimLost(id));
        }
        enrollment.claim = Some(Claim::new(owner, now + lease));
        Ok(enrollment.clone())
    }

    fn finalize(&self, enrollment: &Enrollment, token: Uuid) -> DripResult<bool> {
        let mut stored = self
            .enrollments
            .get_mut(&enrollment.id)
            .ok_or(DripError::EnrollmentNotFound(enrollment.id))?;

        if !stored.is_active() {
            return Ok(false);
        }
        if stored.claim.as_ref().map(|c| c.token) != Some(token) {
            return Err(DripError::ClaimLost(enrollment.id));
        }

        let mut updated = enrollment.clone();
        updated.claim = None;
        let terminal = !updated.is_active();
        *stored = updated;
        drop(stored);

        if terminal {
            self.unindex(enrollment);
        }
        Ok(true)
    }

    fn release_claim(&self, enrollment_id: Uuid, token: Uuid) -> bool {
        match self.enrollments.get_mut(&enrollment_id) {
            Some(mut enrollment) if enrollment.claim.as_ref().map(|c| c.token) == Some(token) => {
                enrollment.claim = None;
                true
            }
            _ => false,
        }
    }

    fn record_response(
        &self,
        campaign_id: Uuid,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> DripResult<Vec<Uuid>> {
        let matching: Vec<Uuid> = self
            .enrollments
            .iter()
            .filter(|e| e.campaign_id == campaign_id && e.is_active())
            .filter(|e| e.recipient.identity().matches_identifier(identifier))
            .map(|e| e.id)
            .collect();

        let mut stopped = Vec::with_capacity(matching.len());
        for id in matching {
            let Some(mut enrollment) = self.enrollments.get_mut(&id) else {
                continue;
            };
            if enrollment.stop(StopReason::UserResponded, now) {
                let snapshot = enrollment.clone();
                drop(enrollment);
                self.unindex(&snapshot);
                stopped.push(id);
            }
        }
        Ok(stopped)
    }

    fn append_execution(&self, execution: StepExecution) -> DripResult<()> {
        self.executions
            .entry(execution.enrollment_id)
            .or_default()
            .push(execution);
        Ok(())
    }

    fn executions_for(&self, enrollment_id: Uuid) -> Vec<StepExecution> {
        self.executions
            .get(&enrollment_id)
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    fn executions_for_campaign(&self, campaign_id: Uuid) -> Vec<StepExecution> {
        self.executions
            .iter()
            .flat_map(|log| {
                log.value()
                    .iter()
                    .filter(|e| e.campaign_id == campaign_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
