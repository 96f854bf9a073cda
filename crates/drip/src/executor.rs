//! Step executor: advances one claimed enrollment by exactly one step.
//!
//! Order of checks for step `n = current_step + 1`:
//!
//! 1. no step `n`: complete
//! 2. stop-on-response and a response is recorded: stop, no dispatch
//! 3. `n > max_reminders + 1`: stop, no dispatch
//! 4. render, dispatch, append a [`StepExecution`]
//! 5. advance to step `n + 1` (or complete), whatever the dispatch outcome
//!
//! The claim is finalized in every branch. A dispatch failure is reported to
//! the caller after the enrollment has advanced.

use std::sync::Arc;

use campaign_channels::adapter::{DispatchContext, OutboundMessage};
use campaign_channels::dispatcher::ChannelDispatcher;
use campaign_channels::survey::SurveyUrlGenerator;
use campaign_core::clock::Clock;
use campaign_core::delay::due_after;
use campaign_core::error::{DripError, DripResult};
use campaign_core::event_bus::{make_event, DripEventType, EventSink};
use campaign_core::types::{
    Campaign, Enrollment, ExecutionStatus, Step, StepExecution, StopReason,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::render::{render_step, resolve_destination};
use crate::store::DripStore;

/// What one execution did to the enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StepOutcome {
    /// Step dispatched successfully; `completed` when it was the last one.
    Sent { step_number: u32, completed: bool },
    /// No step left to run.
    Completed,
    /// A stop condition fired before dispatch.
    Stopped { reason: StopReason },
    /// The enrollment left the active state while this execution held it.
    Superseded,
}

pub struct StepExecutor {
    store: Arc<dyn DripStore>,
    dispatcher: Arc<ChannelDispatcher>,
    survey_links: Arc<dyn SurveyUrlGenerator>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    worker_id: String,
    lease: Duration,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn DripStore>,
        dispatcher: Arc<ChannelDispatcher>,
        survey_links: Arc<dyn SurveyUrlGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            survey_links,
            clock,
            event_sink: campaign_core::event_bus::noop_sink(),
            worker_id: "executor".to_string(),
            lease: Duration::minutes(15),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Owner id and lease length used when this executor claims directly.
    pub fn with_worker(mut self, worker_id: impl Into<String>, lease: Duration) -> Self {
        self.worker_id = worker_id.into();
        self.lease = lease;
        self
    }

    /// Claim `enrollment_id` and run its next step now, ignoring its due
    /// time. Fails with `ClaimLost` if another worker holds it.
    pub async fn execute_next_step(&self, enrollment_id: Uuid) -> DripResult<StepOutcome> {
        let claimed = self.store.claim_enrollment(
            enrollment_id,
            self.clock.now(),
            &self.worker_id,
            self.lease,
        )?;
        self.execute_claimed(claimed).await
    }

    /// Run the next step of an enrollment this worker already claimed. The
    /// claim is released on every error path.
    pub async fn execute_claimed(&self, enrollment: Enrollment) -> DripResult<StepOutcome> {
        let enrollment_id = enrollment.id;
        let token = enrollment
            .claim
            .as_ref()
            .map(|c| c.token)
            .ok_or(DripError::ClaimLost(enrollment_id))?;

        let result = self.run(enrollment, token).await;
        if result.is_err() {
            // No-op when the claim was already finalized.
            self.store.release_claim(enrollment_id, token);
        }
        result
    }

    async fn run(&self, mut enrollment: Enrollment, token: Uuid) -> DripResult<StepOutcome> {
        let campaign = self
            .store
            .get_campaign(enrollment.campaign_id)
            .ok_or(DripError::CampaignNotFound(enrollment.campaign_id))?;
        let now = self.clock.now();
        let step_number = enrollment.current_step + 1;

        let Some(step) = self.store.step(campaign.id, step_number) else {
            enrollment.complete(now);
            return self.commit_terminal(&campaign, &enrollment, token, StepOutcome::Completed);
        };

        if campaign.stop_on_response && enrollment.response_received {
            enrollment.stop(StopReason::UserResponded, now);
            return self.commit_terminal(
                &campaign,
                &enrollment,
                token,
                StepOutcome::Stopped {
                    reason: StopReason::UserResponded,
                },
            );
        }

        if step_number > campaign.max_reminders.saturating_add(1) {
            enrollment.stop(StopReason::MaxReminders, now);
            return self.commit_terminal(
                &campaign,
                &enrollment,
                token,
                StepOutcome::Stopped {
                    reason: StopReason::MaxReminders,
                },
            );
        }

        let scheduled_at = enrollment.next_step_at().unwrap_or(now);
        let delivery = self.deliver(&campaign, &step, &enrollment).await;
        let sent_at = self.clock.now();

        self.record_execution(&campaign, &step, &enrollment, scheduled_at, sent_at, &delivery);

        enrollment.current_step = step_number;
        let completed = match self.store.step(campaign.id, step_number + 1) {
            Some(next) => {
                enrollment.advance(step_number, due_after(sent_at, &next.delay), sent_at);
                false
            }
            None => {
                enrollment.complete(sent_at);
                true
            }
        };

        let applied = self.store.finalize(&enrollment, token)?;
        if !applied {
            info!(
                enrollment_id = %enrollment.id,
                step = step_number,
                "Enrollment stopped while step was in flight, keeping stored state"
            );
        } else if completed {
            self.count_completed(&campaign, &enrollment);
        } else {
            debug!(
                enrollment_id = %enrollment.id,
                step = step_number,
                next_step_at = ?enrollment.next_step_at(),
                "Enrollment advanced"
            );
        }

        match delivery {
            Ok(_) => Ok(StepOutcome::Sent {
                step_number,
                completed: applied && completed,
            }),
            Err(message) => Err(DripError::Dispatch {
                enrollment_id: enrollment.id,
                step_number,
                message,
            }),
        }
    }

    /// Render and hand the step to the channel. `Ok` carries the provider
    /// message id; `Err` is the failure text for the execution log.
    async fn deliver(
        &self,
        campaign: &Campaign,
        step: &Step,
        enrollment: &Enrollment,
    ) -> Result<Option<String>, String> {
        let snapshot = &enrollment.recipient;
        let destination = resolve_destination(campaign.channel, snapshot).ok_or_else(|| {
            format!(
                "recipient has no destination for channel {}",
                campaign.channel
            )
        })?;

        let identifier = snapshot.identity().identifier().unwrap_or(destination.as_str());
        let survey_url = self.survey_links.survey_url(&campaign.form_id, identifier);
        let content = render_step(step, snapshot, &survey_url);

        let message = OutboundMessage {
            destination,
            subject: content.subject.filter(|_| campaign.channel.uses_subject()),
            body: content.body,
            media: step.media.clone(),
            context: DispatchContext {
                campaign_id: campaign.id,
                enrollment_id: enrollment.id,
                step_number: step.step_number,
                recipient_name: snapshot.name().map(str::to_string),
            },
        };

        match self.dispatcher.dispatch(campaign.channel, &message).await {
            Ok(outcome) if outcome.success => Ok(outcome.provider_message_id),
            Ok(outcome) => Err(outcome
                .error
                .unwrap_or_else(|| "provider reported failure".to_string())),
            Err(err) => Err(format!("{err:#}")),
        }
    }

    fn record_execution(
        &self,
        campaign: &Campaign,
        step: &Step,
        enrollment: &Enrollment,
        scheduled_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
        delivery: &Result<Option<String>, String>,
    ) {
        let (status, provider_message_id, error_message) = match delivery {
            Ok(id) => (ExecutionStatus::Sent, id.clone(), None),
            Err(message) => (ExecutionStatus::Failed, None, Some(message.clone())),
        };

        let execution = StepExecution {
            id: Uuid::new_v4(),
            enrollment_id: enrollment.id,
            campaign_id: campaign.id,
            step_id: step.id,
            step_number: step.step_number,
            status,
            provider_message_id,
            scheduled_at,
            sent_at,
            error_message: error_message.clone(),
        };
        if let Err(err) = self.store.append_execution(execution) {
            error!(enrollment_id = %enrollment.id, step = step.step_number, error = %err, "Failed to append step execution");
        }

        let channel = campaign.channel.as_str();
        let event = make_event(
            match status {
                ExecutionStatus::Sent => DripEventType::StepSent,
                ExecutionStatus::Failed => DripEventType::StepFailed,
            },
            campaign.id,
        )
        .for_enrollment(enrollment.id)
        .at_step(step.step_number)
        .via(campaign.channel);

        match error_message {
            None => {
                metrics::counter!("drip.steps.sent", "channel" => channel).increment(1);
                info!(enrollment_id = %enrollment.id, step = step.step_number, channel, "Step sent");
                self.event_sink.emit(event);
            }
            Some(message) => {
                metrics::counter!("drip.steps.failed", "channel" => channel).increment(1);
                warn!(enrollment_id = %enrollment.id, step = step.step_number, channel, error = %message, "Step dispatch failed");
                self.event_sink.emit(event.with_detail(message));
            }
        }
    }

    fn commit_terminal(
        &self,
        campaign: &Campaign,
        enrollment: &Enrollment,
        token: Uuid,
        outcome: StepOutcome,
    ) -> DripResult<StepOutcome> {
        if !self.store.finalize(enrollment, token)? {
            return Ok(StepOutcome::Superseded);
        }

        match outcome {
            StepOutcome::Completed => self.count_completed(campaign, enrollment),
            StepOutcome::Stopped { reason } => {
                metrics::counter!("drip.enrollments.stopped", "reason" => reason.as_str())
                    .increment(1);
                info!(
                    enrollment_id = %enrollment.id,
                    reason = reason.as_str(),
                    "Enrollment stopped"
                );
                self.event_sink.emit(
                    make_event(DripEventType::EnrollmentStopped, campaign.id)
                        .for_enrollment(enrollment.id)
                        .with_detail(reason.as_str()),
                );
            }
            _ => {}
        }
        Ok(outcome)
    }

    fn count_completed(&self, campaign: &Campaign, enrollment: &Enrollment) {
        if let Err(err) = self.store.add_completed(campaign.id) {
            warn!(campaign_id = %campaign.id, error = %err, "Failed to bump completed count");
        }
        metrics::counter!("drip.enrollments.completed").increment(1);
        info!(enrollment_id = %enrollment.id, campaign_id = %campaign.id, "Enrollment completed");
        self.event_sink.emit(
            make_event(DripEventType::EnrollmentCompleted, campaign.id)
                .for_enrollment(enrollment.id),
        );
    }
}
