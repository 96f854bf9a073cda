//! Per-channel send throttling. Keeps each provider under its own rate.

use std::collections::HashMap;
use std::time::Duration;

use campaign_core::config::ChannelRateLimits;
use campaign_core::types::Channel;
use dashmap::DashMap;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed one-second window per channel. A limit of 0 disables throttling
/// for that channel.
pub struct ChannelThrottle {
    limits: HashMap<Channel, u32>,
    windows: DashMap<Channel, Window>,
}

impl ChannelThrottle {
    pub fn new(limits: HashMap<Channel, u32>) -> Self {
        Self {
            limits,
            windows: DashMap::new(),
        }
    }

    pub fn from_config(config: &ChannelRateLimits) -> Self {
        Self::new(HashMap::from([
            (Channel::Email, config.email_per_second),
            (Channel::Sms, config.sms_per_second),
            (Channel::Whatsapp, config.whatsapp_per_second),
            (Channel::Telegram, config.telegram_per_second),
        ]))
    }

    pub fn unlimited() -> Self {
        Self::new(HashMap::new())
    }

    pub fn limit(&self, channel: Channel) -> u32 {
        self.limits.get(&channel).copied().unwrap_or(0)
    }

    /// Take a slot now, or return how long until the window reopens.
    pub fn try_acquire(&self, channel: Channel) -> Result<(), Duration> {
        let limit = self.limit(channel);
        if limit == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let mut window = self.windows.entry(channel).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.duration_since(window.started);
        if elapsed >= WINDOW {
            window.started = now;
            window.count = 0;
        }

        if window.count < limit {
            window.count += 1;
            Ok(())
        } else {
            Err(WINDOW.saturating_sub(elapsed))
        }
    }

    /// Wait until a slot is free for `channel`.
    pub async fn acquire(&self, channel: Channel) {
        loop {
            match self.try_acquire(channel) {
                Ok(()) => return,
                Err(wait) => {
                    metrics::counter!("drip.channels.throttled", "channel" => channel.as_str())
                        .increment(1);
                    tracing::debug!(channel = %channel, wait_ms = wait.as_millis() as u64, "Channel throttled");
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }
}
