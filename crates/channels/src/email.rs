//! SendGrid email adapter.
//!
//! Builds the v3 mail-send payload for each step and keeps a bounded outbox
//! of accepted messages keyed by provider message id.

use async_trait::async_trait;
use campaign_core::config::EmailSettings;
use campaign_core::types::Channel;
use tracing::{debug, info};

use crate::adapter::{ChannelAdapter, OutboundMessage, SendOutcome};
use crate::outbox::Outbox;

/// SendGrid email provider.
pub struct SendGridProvider {
    config: EmailSettings,
    /// Recent accepted payloads keyed by provider message id.
    outbox: Outbox<serde_json::Value>,
}

impl SendGridProvider {
    pub fn new(config: EmailSettings) -> Self {
        info!(
            from = %config.from_email,
            has_key = !config.api_key.is_empty(),
            "SendGrid provider initialized"
        );
        Self {
            config,
            outbox: Outbox::new(),
        }
    }

    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox = Outbox::with_capacity(capacity);
        self
    }

    /// Build the SendGrid API payload.
    /// In production this is POSTed to https://api.sendgrid.com/v3/mail/send
    pub fn build_payload(&self, message: &OutboundMessage) -> serde_json::Value {
        let mut to = serde_json::json!({ "email": message.destination });
        if let Some(name) = &message.context.recipient_name {
            to["name"] = serde_json::json!(name);
        }

        let attachments: Vec<serde_json::Value> = message
            .media
            .iter()
            .map(|m| {
                serde_json::json!({
                    "url": m.url,
                    "type": m.mime_type.clone().unwrap_or_else(|| "application/octet-stream".to_string()),
                })
            })
            .collect();

        serde_json::json!({
            "personalizations": [{
                "to": [to],
                "custom_args": {
                    "campaign_id": message.context.campaign_id.to_string(),
                    "enrollment_id": message.context.enrollment_id.to_string(),
                    "step": message.context.step_number.to_string()
                }
            }],
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name
            },
            "subject": message.subject.clone().unwrap_or_default(),
            "content": [{
                "type": "text/html",
                "value": message.body
            }],
            "attachments": attachments
        })
    }

    pub fn sent_count(&self) -> u64 {
        self.outbox.accepted()
    }

    pub fn sent_payload(&self, provider_message_id: &str) -> Option<serde_json::Value> {
        self.outbox.get(provider_message_id)
    }
}

fn looks_like_email(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
        None => false,
    }
}

#[async_trait]
impl ChannelAdapter for SendGridProvider {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn provider_name(&self) -> &'static str {
        "sendgrid"
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<SendOutcome> {
        if !looks_like_email(&message.destination) {
            return Ok(SendOutcome::rejected(format!(
                "invalid email address '{}'",
                message.destination
            )));
        }

        debug!(
            to = %message.destination,
            campaign_id = %message.context.campaign_id,
            step = message.context.step_number,
            "Sending email via SendGrid"
        );

        let payload = self.build_payload(message);
        let sg_message_id = format!("sg-{}", uuid::Uuid::new_v4());
        self.outbox.record(sg_message_id.clone(), payload);

        metrics::counter!("sendgrid.emails_sent").increment(1);

        Ok(SendOutcome::accepted(sg_message_id))
    }
}
