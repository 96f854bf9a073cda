//! WhatsApp Business Cloud API adapter.

use async_trait::async_trait;
use campaign_core::types::Channel;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapter::{ChannelAdapter, OutboundMessage, SendOutcome};
use crate::outbox::Outbox;
use crate::sms::is_e164;

/// WhatsApp caps a text body at 4096 characters.
const MAX_BODY_CHARS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhatsAppMessageType {
    Text,
    Image,
    Document,
}

impl WhatsAppMessageType {
    fn for_mime(mime: Option<&str>) -> Self {
        match mime {
            Some(m) if m.starts_with("image/") => WhatsAppMessageType::Image,
            _ => WhatsAppMessageType::Document,
        }
    }
}

pub struct WhatsAppProvider {
    api_base_url: String,
    access_token: String,
    phone_number_id: String,
    /// Recent accepted request bodies keyed by provider message id.
    outbox: Outbox<serde_json::Value>,
}

impl WhatsAppProvider {
    pub fn new(api_base_url: String, access_token: String, phone_number_id: String) -> Self {
        tracing::info!(
            base = %api_base_url,
            phone_id = %phone_number_id,
            "WhatsApp provider initialized"
        );
        Self {
            api_base_url,
            access_token,
            phone_number_id,
            outbox: Outbox::new(),
        }
    }

    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox = Outbox::with_capacity(capacity);
        self
    }

    /// Endpoint the request body is POSTed to.
    pub fn messages_endpoint(&self) -> String {
        format!(
            "{}/{}/messages",
            self.api_base_url.trim_end_matches('/'),
            self.phone_number_id
        )
    }

    /// Graph API request body. Media goes out as the message with the body
    /// as its caption; otherwise a plain text message.
    pub fn build_request(&self, message: &OutboundMessage) -> serde_json::Value {
        let to = message.destination.trim_start_matches('+');
        match message.media.first() {
            Some(media) => {
                let kind = WhatsAppMessageType::for_mime(media.mime_type.as_deref());
                let key = match kind {
                    WhatsAppMessageType::Image => "image",
                    _ => "document",
                };
                serde_json::json!({
                    "messaging_product": "whatsapp",
                    "to": to,
                    "type": key,
                    key: { "link": media.url, "caption": message.body }
                })
            }
            None => serde_json::json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "text",
                "text": { "preview_url": true, "body": message.body }
            }),
        }
    }

    pub fn sent_request(&self, provider_message_id: &str) -> Option<serde_json::Value> {
        self.outbox.get(provider_message_id)
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppProvider {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn provider_name(&self) -> &'static str {
        "whatsapp_cloud"
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<SendOutcome> {
        if !is_e164(&message.destination) {
            return Ok(SendOutcome::rejected(format!(
                "'{}' is not a WhatsApp-capable phone number",
                message.destination
            )));
        }
        if message.body.chars().count() > MAX_BODY_CHARS {
            return Ok(SendOutcome::rejected("message body exceeds 4096 characters"));
        }

        let request = self.build_request(message);
        tracing::info!(
            to = %message.destination,
            endpoint = %self.messages_endpoint(),
            token_len = self.access_token.len(),
            step = message.context.step_number,
            "Sending WhatsApp message"
        );

        let wamid = format!("wamid.{}", Uuid::new_v4().simple());
        self.outbox.record(wamid.clone(), request);
        metrics::counter!("whatsapp.messages_sent").increment(1);

        Ok(SendOutcome::accepted(wamid))
    }
}
