//! Drip campaign domain model: campaigns and their ordered steps, recipient
//! enrollments, and the append-only step execution log.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Channels ───────────────────────────────────────────────────────────────

/// Delivery channel a campaign sends through. Closed set; each variant has
/// exactly one adapter registered at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Whatsapp,
    Telegram,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Email,
        Channel::Sms,
        Channel::Whatsapp,
        Channel::Telegram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Whatsapp => "whatsapp",
            Channel::Telegram => "telegram",
        }
    }

    /// Only email carries a subject line.
    pub fn uses_subject(&self) -> bool {
        matches!(self, Channel::Email)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Delays ─────────────────────────────────────────────────────────────────

/// Unit of a step delay. Deserializing an unknown label yields `Days`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl DelayUnit {
    /// Parse a unit label, falling back to `Days` for anything outside
    /// the closed set.
    pub fn parse_lenient(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "minutes" => DelayUnit::Minutes,
            "hours" => DelayUnit::Hours,
            "days" => DelayUnit::Days,
            "weeks" => DelayUnit::Weeks,
            other => {
                tracing::debug!(unit = %other, "Unrecognized delay unit, using days");
                DelayUnit::Days
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DelayUnit::Minutes => "minutes",
            DelayUnit::Hours => "hours",
            DelayUnit::Days => "days",
            DelayUnit::Weeks => "weeks",
        }
    }

    /// Length of `amount` units.
    pub fn span(&self, amount: u32) -> Duration {
        let amount = i64::from(amount);
        match self {
            DelayUnit::Minutes => Duration::minutes(amount),
            DelayUnit::Hours => Duration::hours(amount),
            DelayUnit::Days => Duration::days(amount),
            DelayUnit::Weeks => Duration::weeks(amount),
        }
    }
}

impl From<String> for DelayUnit {
    fn from(label: String) -> Self {
        DelayUnit::parse_lenient(&label)
    }
}

impl From<&str> for DelayUnit {
    fn from(label: &str) -> Self {
        DelayUnit::parse_lenient(label)
    }
}

/// Wait before a step becomes due.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delay {
    pub amount: u32,
    pub unit: DelayUnit,
}

impl Delay {
    pub fn new(amount: u32, unit: DelayUnit) -> Self {
        Self { amount, unit }
    }

    pub fn immediate() -> Self {
        Self::new(0, DelayUnit::Minutes)
    }

    pub fn minutes(amount: u32) -> Self {
        Self::new(amount, DelayUnit::Minutes)
    }

    pub fn hours(amount: u32) -> Self {
        Self::new(amount, DelayUnit::Hours)
    }

    pub fn days(amount: u32) -> Self {
        Self::new(amount, DelayUnit::Days)
    }

    pub fn weeks(amount: u32) -> Self {
        Self::new(amount, DelayUnit::Weeks)
    }
}

// ─── Campaign ───────────────────────────────────────────────────────────────

/// Flat lifecycle status, used for filtering and error reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
}

/// Campaign lifecycle state. Timestamps live inside the variant that owns
/// them, so an active campaign always has a `started_at`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CampaignState {
    Draft,
    Active {
        started_at: DateTime<Utc>,
    },
    Paused {
        started_at: DateTime<Utc>,
        paused_at: DateTime<Utc>,
    },
}

/// The three guarded lifecycle edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignTransition {
    Start,
    Pause,
    Resume,
}

impl CampaignTransition {
    /// The single prior status this edge may leave from.
    pub fn required_status(&self) -> CampaignStatus {
        match self {
            CampaignTransition::Start => CampaignStatus::Draft,
            CampaignTransition::Pause => CampaignStatus::Active,
            CampaignTransition::Resume => CampaignStatus::Paused,
        }
    }

    pub fn target_status(&self) -> CampaignStatus {
        match self {
            CampaignTransition::Start | CampaignTransition::Resume => CampaignStatus::Active,
            CampaignTransition::Pause => CampaignStatus::Paused,
        }
    }
}

impl CampaignState {
    pub fn status(&self) -> CampaignStatus {
        match self {
            CampaignState::Draft => CampaignStatus::Draft,
            CampaignState::Active { .. } => CampaignStatus::Active,
            CampaignState::Paused { .. } => CampaignStatus::Paused,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CampaignState::Draft => None,
            CampaignState::Active { started_at } | CampaignState::Paused { started_at, .. } => {
                Some(*started_at)
            }
        }
    }

    /// draft → active
    pub fn start(self, now: DateTime<Utc>) -> Option<CampaignState> {
        match self {
            CampaignState::Draft => Some(CampaignState::Active { started_at: now }),
            _ => None,
        }
    }

    /// active → paused
    pub fn pause(self, now: DateTime<Utc>) -> Option<CampaignState> {
        match self {
            CampaignState::Active { started_at } => Some(CampaignState::Paused {
                started_at,
                paused_at: now,
            }),
            _ => None,
        }
    }

    /// paused → active, keeping the original start time.
    pub fn resume(self) -> Option<CampaignState> {
        match self {
            CampaignState::Paused { started_at, .. } => Some(CampaignState::Active { started_at }),
            _ => None,
        }
    }

    /// Apply one edge. `None` means the current state is not the required
    /// prior state.
    pub fn apply(self, transition: CampaignTransition, now: DateTime<Utc>) -> Option<CampaignState> {
        match transition {
            CampaignTransition::Start => self.start(now),
            CampaignTransition::Pause => self.pause(now),
            CampaignTransition::Resume => self.resume(),
        }
    }
}

/// A drip campaign definition. Authored elsewhere; this crate only reads it
/// and applies lifecycle transitions and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub form_id: String,
    pub name: String,
    pub channel: Channel,
    pub stop_on_response: bool,
    pub max_reminders: u32,
    /// Stored for display only; delays are flat offsets.
    pub timezone: String,
    #[serde(flatten)]
    pub state: CampaignState,
    pub enrollment_count: u64,
    pub completed_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// New draft campaign with reminders capped at 3 and stop-on-response on.
    pub fn new(
        tenant_id: Uuid,
        form_id: impl Into<String>,
        name: impl Into<String>,
        channel: Channel,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            form_id: form_id.into(),
            name: name.into(),
            channel,
            stop_on_response: true,
            max_reminders: 3,
            timezone: "UTC".to_string(),
            state: CampaignState::Draft,
            enrollment_count: 0,
            completed_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_stop_on_response(mut self, stop_on_response: bool) -> Self {
        self.stop_on_response = stop_on_response;
        self
    }

    pub fn with_max_reminders(mut self, max_reminders: u32) -> Self {
        self.max_reminders = max_reminders;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn status(&self) -> CampaignStatus {
        self.state.status()
    }

    pub fn is_active(&self) -> bool {
        self.status() == CampaignStatus::Active
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.started_at()
    }
}

/// Media attached to a step (image, document, voice note).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// One templated, delayed message in a campaign's sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub campaign_id: Uuid,
    /// 1-based, contiguous within the campaign.
    pub step_number: u32,
    pub step_type: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    pub delay: Delay,
    /// Reserved; carried but not evaluated.
    #[serde(default)]
    pub conditions: serde_json::Value,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

impl Step {
    pub fn new(campaign_id: Uuid, step_number: u32, body: impl Into<String>, delay: Delay) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            step_number,
            step_type: "message".to_string(),
            subject: None,
            body: body.into(),
            delay,
            conditions: serde_json::Value::Null,
            media: Vec::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media.push(media);
        self
    }
}

// ─── Recipients ─────────────────────────────────────────────────────────────

/// A recipient as supplied to enrollment. Any extra fields are kept as
/// attributes and frozen into the enrollment snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Recipient {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Recipient {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Default::default()
        }
    }

    pub fn with_phone(phone: impl Into<String>) -> Self {
        Self {
            phone: Some(phone.into()),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn identity(&self) -> RecipientIdentity {
        RecipientIdentity::new(self.email.as_deref(), self.phone.as_deref())
    }
}

/// Normalized email/phone pair used to match recipients. Two identities
/// match when either the email or the phone is equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientIdentity {
    email: Option<String>,
    phone: Option<String>,
}

impl RecipientIdentity {
    pub fn new(email: Option<&str>, phone: Option<&str>) -> Self {
        Self {
            email: email.and_then(normalize_email),
            phone: phone.and_then(normalize_phone),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone.is_none()
    }

    /// Stable identifier for links and lookups: email, else phone.
    pub fn identifier(&self) -> Option<&str> {
        self.email().or_else(|| self.phone())
    }

    pub fn matches(&self, other: &RecipientIdentity) -> bool {
        let email_match = matches!((self.email(), other.email()), (Some(a), Some(b)) if a == b);
        let phone_match = matches!((self.phone(), other.phone()), (Some(a), Some(b)) if a == b);
        email_match || phone_match
    }

    /// Match a bare identifier that may be either an email or a phone.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let as_email = normalize_email(identifier);
        let as_phone = normalize_phone(identifier);
        (as_email.is_some() && self.email == as_email)
            || (as_phone.is_some() && self.phone == as_phone)
    }

    /// Keys under which this identity is indexed, one per known contact.
    pub fn index_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if let Some(email) = self.email() {
            keys.push(format!("email:{email}"));
        }
        if let Some(phone) = self.phone() {
            keys.push(format!("phone:{phone}"));
        }
        keys
    }
}

fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}

fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Recipient attributes frozen at enrollment time. Has no setters: every
/// later render reads this copy, never a live contact record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientSnapshot {
    identity: RecipientIdentity,
    name: Option<String>,
    attributes: BTreeMap<String, serde_json::Value>,
    captured_at: DateTime<Utc>,
}

impl RecipientSnapshot {
    pub fn capture(recipient: &Recipient, captured_at: DateTime<Utc>) -> Self {
        Self {
            identity: recipient.identity(),
            name: recipient
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            attributes: recipient.attributes.clone(),
            captured_at,
        }
    }

    pub fn identity(&self) -> &RecipientIdentity {
        &self.identity
    }

    pub fn email(&self) -> Option<&str> {
        self.identity.email()
    }

    pub fn phone(&self) -> Option<&str> {
        self.identity.phone()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

// ─── Enrollments ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserResponded,
    MaxReminders,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::UserResponded => "user_responded",
            StopReason::MaxReminders => "max_reminders",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Stopped,
}

/// Enrollment lifecycle. `next_step_at` exists only on `Active`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum EnrollmentState {
    Active {
        next_step_at: DateTime<Utc>,
    },
    Completed {
        completed_at: DateTime<Utc>,
    },
    Stopped {
        reason: StopReason,
        stopped_at: DateTime<Utc>,
    },
}

/// Lease held by one scheduler worker while it executes a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claim {
    pub token: Uuid,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(owner: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4(),
            owner: owner.into(),
            expires_at,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A recipient's progress through one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub recipient: RecipientSnapshot,
    /// Last executed step number; 0 before the first dispatch.
    pub current_step: u32,
    #[serde(flatten)]
    state: EnrollmentState,
    pub response_received: bool,
    #[serde(default)]
    pub claim: Option<Claim>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(
        campaign_id: Uuid,
        recipient: RecipientSnapshot,
        first_step_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            recipient,
            current_step: 0,
            state: EnrollmentState::Active {
                next_step_at: first_step_at,
            },
            response_received: false,
            claim: None,
            enrolled_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> EnrollmentStatus {
        match self.state {
            EnrollmentState::Active { .. } => EnrollmentStatus::Active,
            EnrollmentState::Completed { .. } => EnrollmentStatus::Completed,
            EnrollmentState::Stopped { .. } => EnrollmentStatus::Stopped,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, EnrollmentState::Active { .. })
    }

    pub fn next_step_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            EnrollmentState::Active { next_step_at } => Some(next_step_at),
            _ => None,
        }
    }

    pub fn stopped_reason(&self) -> Option<StopReason> {
        match self.state {
            EnrollmentState::Stopped { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Active and due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_step_at().is_some_and(|at| at <= now)
    }

    /// Held by a lease that has not expired.
    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        self.claim.as_ref().is_some_and(|c| c.is_live(now))
    }

    /// Record that `step_number` ran and schedule the next one. No-op on a
    /// terminal enrollment.
    pub fn advance(&mut self, step_number: u32, next_step_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.current_step = step_number;
        self.state = EnrollmentState::Active { next_step_at };
        self.updated_at = now;
        true
    }

    /// Terminal: every step has run.
    pub fn complete(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.state = EnrollmentState::Completed { completed_at: now };
        self.claim = None;
        self.updated_at = now;
        true
    }

    /// Terminal: a stop condition fired.
    pub fn stop(&mut self, reason: StopReason, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        if reason == StopReason::UserResponded {
            self.response_received = true;
        }
        self.state = EnrollmentState::Stopped {
            reason,
            stopped_at: now,
        };
        self.claim = None;
        self.updated_at = now;
        true
    }
}

// ─── Execution log ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Sent,
    Failed,
}

/// One dispatch attempt. Appended, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub campaign_id: Uuid,
    pub step_id: Uuid,
    pub step_number: u32,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ─── Aggregates ─────────────────────────────────────────────────────────────

/// Result of one enroll call. Per-recipient failures land in `skipped`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrollSummary {
    pub enrolled: usize,
    pub skipped: usize,
    pub total: usize,
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickSummary {
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepDeliveryStats {
    pub step_number: u32,
    pub sent: u64,
    pub failed: u64,
}

/// Read-only enrollment aggregate for one campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignStats {
    pub campaign_id: Uuid,
    pub total: u64,
    pub active: u64,
    pub completed: u64,
    pub stopped: u64,
    pub responded: u64,
    pub response_rate: f64,
    pub steps: Vec<StepDeliveryStats>,
}
