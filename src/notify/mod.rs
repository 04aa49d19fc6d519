//! Notification rendering, delivery bookkeeping and channel fan-out.

mod composer;
mod delivery;
pub mod gsm;
mod notifier;
mod push;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use composer::NotificationComposer;
pub use delivery::{DeliveryTracker, Enqueued, JobStatus, NotificationJob};
pub use notifier::{DeliveryOutcome, DeliveryReport, Notifier, SmsSender};
pub use push::{LogPushSender, PushSender, WebhookPushSender};

/// Where a notification goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Push,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Sms => write!(f, "sms"),
            Channel::Push => write!(f, "push"),
        }
    }
}

/// A message ready for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub channel: Channel,
    pub body: String,
    /// SMS parts needed; always 1 for push.
    pub segments: usize,
}
