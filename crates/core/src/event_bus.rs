//! Drip event bus: trait for emitting lifecycle events from any module.
//!
//! Components accept an `Arc<dyn EventSink>` so the binary can route events
//! to logs, a message bus, or customer webhooks while tests capture them.

use crate::types::Channel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DripEventType {
    CampaignStarted,
    CampaignPaused,
    CampaignResumed,
    EnrollmentCreated,
    StepSent,
    StepFailed,
    EnrollmentCompleted,
    EnrollmentStopped,
    ResponseRecorded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DripEvent {
    pub event_id: Uuid,
    pub event_type: DripEventType,
    pub campaign_id: Uuid,
    pub enrollment_id: Option<Uuid>,
    pub step_number: Option<u32>,
    pub channel: Option<Channel>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DripEvent {
    pub fn for_enrollment(mut self, enrollment_id: Uuid) -> Self {
        self.enrollment_id = Some(enrollment_id);
        self
    }

    pub fn at_step(mut self, step_number: u32) -> Self {
        self.step_number = Some(step_number);
        self
    }

    pub fn via(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Trait for emitting drip events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DripEvent);
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: DripEvent) {}
}

/// Writes every event to the tracing pipeline.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DripEvent) {
        tracing::info!(
            target: "drip_events",
            event_type = ?event.event_type,
            campaign_id = %event.campaign_id,
            enrollment_id = ?event.enrollment_id,
            step = ?event.step_number,
            channel = ?event.channel,
            detail = ?event.detail,
            "drip event"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<DripEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DripEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: DripEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: DripEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for a `DripEvent` with minimal boilerplate.
pub fn make_event(event_type: DripEventType, campaign_id: Uuid) -> DripEvent {
    DripEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id,
        enrollment_id: None,
        step_number: None,
        channel: None,
        detail: None,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
