//! Channel dispatcher: routes a rendered message to the adapter for the
//! campaign's channel, under that channel's rate limit and a hard timeout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use campaign_core::types::Channel;
use tracing::{debug, info};

use crate::adapter::{ChannelRegistry, OutboundMessage, SendOutcome};
use crate::throttle::ChannelThrottle;

pub struct ChannelDispatcher {
    registry: ChannelRegistry,
    throttle: Arc<ChannelThrottle>,
    timeout: Duration,
}

impl ChannelDispatcher {
    pub fn new(registry: ChannelRegistry, throttle: Arc<ChannelThrottle>, timeout: Duration) -> Self {
        let missing = registry.missing();
        info!(
            ?missing,
            timeout_ms = timeout.as_millis() as u64,
            "Channel dispatcher initialized"
        );
        Self {
            registry,
            throttle,
            timeout,
        }
    }

    /// Send through the adapter for `channel`. `Err` covers a missing
    /// adapter, an adapter fault, and a timeout; a provider rejection comes
    /// back as `Ok` with `success == false`.
    pub async fn dispatch(
        &self,
        channel: Channel,
        message: &OutboundMessage,
    ) -> anyhow::Result<SendOutcome> {
        let adapter = self
            .registry
            .get(channel)
            .ok_or_else(|| anyhow!("no adapter registered for channel {channel}"))?;

        self.throttle.acquire(channel).await;

        let start = std::time::Instant::now();
        let result = tokio::time::timeout(self.timeout, adapter.send(message)).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        metrics::histogram!("drip.dispatch.latency_ms", "channel" => channel.as_str())
            .record(latency_ms as f64);

        let outcome = match result {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(anyhow!(
                    "{} adapter timed out after {}ms",
                    adapter.provider_name(),
                    self.timeout.as_millis()
                ));
            }
        };

        debug!(
            channel = %channel,
            provider = adapter.provider_name(),
            success = outcome.success,
            latency_ms,
            "Dispatch finished"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::adapter::{ChannelAdapter, DispatchContext};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct SlowAdapter;

    #[async_trait]
    impl ChannelAdapter for SlowAdapter {
        fn channel(&self) -> Channel {
            Channel::Sms
        }

        fn provider_name(&self) -> &'static str {
            "slow"
        }

        async fn send(&self, _message: &OutboundMessage) -> anyhow::Result<SendOutcome> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SendOutcome::accepted("late"))
        }
    }

    struct BrokenAdapter;

    #[async_trait]
    impl ChannelAdapter for BrokenAdapter {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        fn provider_name(&self) -> &'static str {
            "broken"
        }

        async fn send(&self, _message: &OutboundMessage) -> anyhow::Result<SendOutcome> {
            Err(anyhow!("connection reset"))
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            destination: "+15550001111".to_string(),
            subject: None,
            body: "hi".to_string(),
            media: vec![],
            context: DispatchContext {
                campaign_id: Uuid::new_v4(),
                enrollment_id: Uuid::new_v4(),
                step_number: 1,
                recipient_name: None,
            },
        }
    }

    fn dispatcher(registry: ChannelRegistry) -> ChannelDispatcher {
        ChannelDispatcher::new(
            registry,
            Arc::new(ChannelThrottle::unlimited()),
            Duration::from_millis(500),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_adapter_times_out() {
        let dispatcher = dispatcher(ChannelRegistry::new().with_adapter(Arc::new(SlowAdapter)));
        let err = dispatcher.dispatch(Channel::Sms, &message()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_adapter_error_propagates() {
        let dispatcher = dispatcher(ChannelRegistry::new().with_adapter(Arc::new(BrokenAdapter)));
        let err = dispatcher.dispatch(Channel::Email, &message()).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_missing_adapter_is_an_error() {
        let dispatcher = dispatcher(ChannelRegistry::new());
        let err = dispatcher
            .dispatch(Channel::Telegram, &message())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no adapter"));
    }
}
