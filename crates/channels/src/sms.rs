//! Twilio SMS adapter with segment accounting and a bounded message log.

use async_trait::async_trait;
use campaign_core::types::Channel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapter::{ChannelAdapter, OutboundMessage, SendOutcome};
use crate::outbox::Outbox;

/// Messages longer than this many segments are refused.
const MAX_SEGMENTS: u32 = 10;

/// GSM 03.38 basic alphabet (Latin and Greek subset) plus the extension
/// table characters.
const GSM_7BIT_CHARS: &str = "@£$¥èéùìòÇØøÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?\
¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà\n\r{}[]~\\^|€";

/// Configuration for the Twilio SMS provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub status_callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
}

/// An SMS handed to Twilio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsMessage {
    pub provider_id: String,
    pub to: String,
    pub from: String,
    pub body: String,
    pub media_urls: Vec<String>,
    pub status: SmsStatus,
    pub segments: u32,
    pub enrollment_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Twilio SMS provider.
pub struct SmsProvider {
    config: TwilioConfig,
    messages: Outbox<SmsMessage>,
}

impl SmsProvider {
    pub fn new(config: TwilioConfig) -> Self {
        tracing::info!(
            account_sid = %config.account_sid,
            from = %config.from_number,
            "Twilio SMS provider initialized"
        );
        Self {
            config,
            messages: Outbox::new(),
        }
    }

    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.messages = Outbox::with_capacity(capacity);
        self
    }

    /// Number of SMS segments for `body`: 160/153 characters per segment
    /// for GSM 7-bit text, 70/67 for anything needing UCS-2.
    pub fn calculate_segments(body: &str) -> u32 {
        let chars = body.chars().count() as u32;
        if chars == 0 {
            return 1;
        }
        let (single, multi) = if body.chars().all(is_gsm_7bit) {
            (160, 153)
        } else {
            (70, 67)
        };
        if chars <= single {
            1
        } else {
            chars.div_ceil(multi)
        }
    }

    pub fn get_message(&self, provider_id: &str) -> Option<SmsMessage> {
        self.messages.get(provider_id)
    }

    pub fn sent_count(&self) -> u64 {
        self.messages.accepted()
    }
}

fn is_gsm_7bit(c: char) -> bool {
    GSM_7BIT_CHARS.contains(c)
}

/// `+` followed by 8 to 15 digits.
pub(crate) fn is_e164(number: &str) -> bool {
    match number.strip_prefix('+') {
        Some(digits) => {
            (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

#[async_trait]
impl ChannelAdapter for SmsProvider {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn provider_name(&self) -> &'static str {
        "twilio"
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<SendOutcome> {
        if !is_e164(&message.destination) {
            return Ok(SendOutcome::rejected(format!(
                "'{}' is not an E.164 phone number",
                message.destination
            )));
        }

        let segments = Self::calculate_segments(&message.body);
        if segments > MAX_SEGMENTS {
            return Ok(SendOutcome::rejected(format!(
                "message needs {segments} segments, limit is {MAX_SEGMENTS}"
            )));
        }

        let provider_id = format!("SM{}", Uuid::new_v4().simple());
        let sms = SmsMessage {
            provider_id: provider_id.clone(),
            to: message.destination.clone(),
            from: self.config.from_number.clone(),
            body: message.body.clone(),
            media_urls: message.media.iter().map(|m| m.url.clone()).collect(),
            status: SmsStatus::Queued,
            segments,
            enrollment_id: message.context.enrollment_id,
            created_at: Utc::now(),
        };

        tracing::info!(
            to = %sms.to,
            provider_id = %provider_id,
            segments = segments,
            "SMS message queued"
        );

        metrics::counter!("sms.messages_sent").increment(1);
        metrics::counter!("sms.segments_sent").increment(u64::from(segments));

        self.messages.record(provider_id.clone(), sms);
        Ok(SendOutcome::accepted(provider_id))
    }
}
