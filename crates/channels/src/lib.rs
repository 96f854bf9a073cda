//! Delivery channels for drip campaigns.
//!
//! Every transport sits behind the [`ChannelAdapter`] contract and is looked
//! up through a [`ChannelRegistry`] keyed by the closed `Channel` enum. The
//! [`ChannelDispatcher`] adds per-channel rate limiting and a bounded timeout.

#![warn(clippy::unwrap_used)]

pub mod adapter;
pub mod dispatcher;
pub mod email;
pub mod outbox;
pub mod sms;
pub mod survey;
pub mod telegram;
pub mod throttle;
pub mod whatsapp;

pub use adapter::{ChannelAdapter, ChannelRegistry, DispatchContext, OutboundMessage, SendOutcome};
pub use dispatcher::ChannelDispatcher;
pub use email::SendGridProvider;
pub use outbox::Outbox;
pub use sms::SmsProvider;
pub use survey::{HostedSurveyLinks, SurveyUrlGenerator};
pub use telegram::TelegramProvider;
pub use throttle::ChannelThrottle;
pub use whatsapp::WhatsAppProvider;
