//! Telegram Bot API adapter.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use campaign_core::types::Channel;

use crate::adapter::{ChannelAdapter, OutboundMessage, SendOutcome};
use crate::outbox::Outbox;

/// Bot API limit for `sendMessage` text.
const MAX_TEXT_CHARS: usize = 4096;

pub struct TelegramProvider {
    api_base_url: String,
    bot_token: String,
    next_message_id: AtomicU64,
    outbox: Outbox<serde_json::Value>,
}

impl TelegramProvider {
    pub fn new(api_base_url: String, bot_token: String) -> Self {
        tracing::info!(
            base = %api_base_url,
            has_token = !bot_token.is_empty(),
            "Telegram provider initialized"
        );
        Self {
            api_base_url,
            bot_token,
            next_message_id: AtomicU64::new(1),
            outbox: Outbox::new(),
        }
    }

    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox = Outbox::with_capacity(capacity);
        self
    }

    /// Bot API method URL.
    pub fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.bot_token,
            method
        )
    }

    /// Method and body for a message. The first attachment picks the
    /// method: images go through `sendPhoto`, anything else through
    /// `sendDocument`, with the body as caption.
    pub fn build_request(&self, message: &OutboundMessage) -> (&'static str, serde_json::Value) {
        match message.media.first() {
            Some(media) if media.mime_type.as_deref().is_some_and(|t| t.starts_with("image/")) => (
                "sendPhoto",
                serde_json::json!({
                    "chat_id": message.destination,
                    "photo": media.url,
                    "caption": message.body,
                    "parse_mode": "HTML"
                }),
            ),
            Some(media) => (
                "sendDocument",
                serde_json::json!({
                    "chat_id": message.destination,
                    "document": media.url,
                    "caption": message.body,
                    "parse_mode": "HTML"
                }),
            ),
            None => (
                "sendMessage",
                serde_json::json!({
                    "chat_id": message.destination,
                    "text": message.body,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": false
                }),
            ),
        }
    }

    pub fn sent_request(&self, provider_message_id: &str) -> Option<serde_json::Value> {
        self.outbox.get(provider_message_id)
    }
}

/// Numeric chat ids, `@channel` usernames, or phone-style ids.
fn is_chat_id(destination: &str) -> bool {
    let trimmed = destination.trim();
    if let Some(username) = trimmed.strip_prefix('@') {
        return username.len() >= 5;
    }
    let digits = trimmed.strip_prefix(['-', '+']).unwrap_or(trimmed);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[async_trait]
impl ChannelAdapter for TelegramProvider {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    fn provider_name(&self) -> &'static str {
        "telegram_bot"
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<SendOutcome> {
        if !is_chat_id(&message.destination) {
            return Ok(SendOutcome::rejected(format!(
                "'{}' is not a Telegram chat id",
                message.destination
            )));
        }
        if message.body.chars().count() > MAX_TEXT_CHARS {
            return Ok(SendOutcome::rejected("message text exceeds 4096 characters"));
        }

        let (method, request) = self.build_request(message);
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let provider_id = format!("tg-{}-{}", message.destination.trim(), message_id);

        tracing::debug!(
            chat_id = %message.destination,
            method = method,
            url_len = self.method_url(method).len(),
            "Sending Telegram message"
        );

        self.outbox.record(provider_id.clone(), request);
        metrics::counter!("telegram.messages_sent", "method" => method).increment(1);

        Ok(SendOutcome::accepted(provider_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::adapter::DispatchContext;
    use campaign_core::types::MediaRef;
    use uuid::Uuid;

    fn message(chat_id: &str) -> OutboundMessage {
        OutboundMessage {
            destination: chat_id.to_string(),
            subject: None,
            body: "Got a minute for two questions?".to_string(),
            media: vec![],
            context: DispatchContext {
                campaign_id: Uuid::new_v4(),
                enrollment_id: Uuid::new_v4(),
                step_number: 3,
                recipient_name: None,
            },
        }
    }

    #[test]
    fn test_chat_id_forms() {
        assert!(is_chat_id("123456789"));
        assert!(is_chat_id("-1001234567890"));
        assert!(is_chat_id("@surveybot"));
        assert!(is_chat_id("+447700900123"));
        assert!(!is_chat_id("@ab"));
        assert!(!is_chat_id("someone@example.com"));
    }

    #[test]
    fn test_method_url() {
        let provider = TelegramProvider::new("https://api.telegram.org/".into(), "42:abc".into());
        assert_eq!(
            provider.method_url("sendMessage"),
            "https://api.telegram.org/bot42:abc/sendMessage"
        );
    }

    #[tokio::test]
    async fn test_photo_uses_send_photo() {
        let provider = TelegramProvider::new("https://api.telegram.org".into(), "t".into());
        let mut msg = message("123456789");
        msg.media.push(MediaRef {
            url: "https://cdn.example.com/p.jpg".into(),
            mime_type: Some("image/jpeg".into()),
        });
        let (method, request) = provider.build_request(&msg);
        assert_eq!(method, "sendPhoto");
        assert_eq!(request["caption"], "Got a minute for two questions?");

        let outcome = provider.send(&msg).await.unwrap();
        assert!(outcome.success);
        assert!(provider
            .sent_request(outcome.provider_message_id.as_deref().unwrap())
            .is_some());
    }

    #[test]
    fn test_non_image_media_uses_send_document() {
        let provider = TelegramProvider::new("https://api.telegram.org".into(), "t".into());
        let mut msg = message("123456789");
        msg.media.push(MediaRef {
            url: "https://cdn.example.com/menu.pdf".into(),
            mime_type: Some("application/pdf".into()),
        });
        let (method, request) = provider.build_request(&msg);
        assert_eq!(method, "sendDocument");
        assert_eq!(request["document"], "https://cdn.example.com/menu.pdf");

        let (method, _) = provider.build_request(&message("123456789"));
        assert_eq!(method, "sendMessage");
    }

    #[tokio::test]
    async fn test_bad_chat_id_is_rejected() {
        let provider = TelegramProvider::new("https://api.telegram.org".into(), "t".into());
        let outcome = provider.send(&message("not a chat")).await.unwrap();
        assert!(!outcome.success);
    }
}
