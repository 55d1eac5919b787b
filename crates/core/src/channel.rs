//! Channel trait: the outbound transport for reply text.

use crate::dialog::ChatKind;
use crate::error::ChannelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where a reply goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTarget {
    pub chat_id: i64,

    pub chat_kind: ChatKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,

    /// Message the reply is anchored to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
}

impl ChatTarget {
    pub fn new(chat_id: i64, chat_kind: ChatKind) -> Self {
        Self {
            chat_id,
            chat_kind,
            thread_id: None,
            reply_to: None,
        }
    }

    pub fn with_thread(mut self, thread_id: Option<i64>) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn replying_to(mut self, message_id: Option<i64>) -> Self {
        self.reply_to = message_id;
        self
    }

    /// A broadcast channel post with nothing to attach a reply to.
    /// Transports must not post into such a target.
    pub fn is_unanchored_broadcast(&self) -> bool {
        self.chat_kind == ChatKind::Channel && self.thread_id.is_none() && self.reply_to.is_none()
    }
}

/// The outbound transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// A human-readable name (e.g., "telegram").
    fn name(&self) -> &str;

    /// Deliver `text`, split into as many messages as the platform needs.
    /// Returns how many messages were posted; zero when the target declines.
    async fn send(&self, target: &ChatTarget, text: &str) -> std::result::Result<usize, ChannelError>;

    /// Show a "typing" indicator.
    async fn send_typing(&self, target: &ChatTarget) -> std::result::Result<(), ChannelError>;
}
