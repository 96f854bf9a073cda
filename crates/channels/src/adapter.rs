//! Uniform send contract implemented once per delivery channel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use campaign_core::config::ChannelsConfig;
use campaign_core::types::{Channel, MediaRef};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::email::SendGridProvider;
use crate::sms::{SmsProvider, TwilioConfig};
use crate::telegram::TelegramProvider;
use crate::whatsapp::WhatsAppProvider;

/// Where a message came from, passed through to providers for tagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchContext {
    pub campaign_id: Uuid,
    pub enrollment_id: Uuid,
    pub step_number: u32,
    pub recipient_name: Option<String>,
}

/// A fully rendered message ready for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub destination: String,
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    pub context: DispatchContext,
}

/// What the provider reported. `success == false` is a reported failure;
/// an `Err` from [`ChannelAdapter::send`] is a transport fault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn accepted(provider_message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_message_id: Some(provider_message_id.into()),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel this adapter serves.
    fn channel(&self) -> Channel;

    /// Provider label for logs and metrics.
    fn provider_name(&self) -> &'static str;

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<SendOutcome>;
}

/// Adapters keyed by channel. Registering a second adapter for the same
/// channel replaces the first.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<&Channel> = self.adapters.keys().collect();
        channels.sort();
        f.debug_struct("ChannelRegistry")
            .field("channels", &channels)
            .finish()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the four provider adapters from configuration.
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let capacity = config.outbox_capacity;
        let mut registry = Self::new();
        registry.register(Arc::new(
            SendGridProvider::new(config.email.clone()).with_outbox_capacity(capacity),
        ));
        registry.register(Arc::new(
            SmsProvider::new(TwilioConfig {
                account_sid: config.sms.account_sid.clone(),
                auth_token: config.sms.auth_token.clone(),
                from_number: config.sms.from_number.clone(),
                status_callback_url: None,
            })
            .with_outbox_capacity(capacity),
        ));
        registry.register(Arc::new(
            WhatsAppProvider::new(
                config.whatsapp.api_base_url.clone(),
                config.whatsapp.access_token.clone(),
                config.whatsapp.phone_number_id.clone(),
            )
            .with_outbox_capacity(capacity),
        ));
        registry.register(Arc::new(
            TelegramProvider::new(
                config.telegram.api_base_url.clone(),
                config.telegram.bot_token.clone(),
            )
            .with_outbox_capacity(capacity),
        ));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let channel = adapter.channel();
        info!(
            channel = %channel,
            provider = adapter.provider_name(),
            "Channel adapter registered"
        );
        self.adapters.insert(channel, adapter);
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    /// Channels that have no adapter.
    pub fn missing(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| !self.adapters.contains_key(c))
            .collect()
    }
}
