//! Normalized inbound events.
//!
//! Transport crates parse their wire format into an [`InboundEvent`]; the
//! engine never sees raw payloads. Every optional platform field stays
//! optional here.

use crate::channel::ChatTarget;
use crate::dialog::{ChatKind, DialogKey};
use serde::{Deserialize, Serialize};

/// One chat message addressed to (or overheard by) the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: i64,

    pub chat_kind: ChatKind,

    pub message_id: i64,

    #[serde(default)]
    pub thread_id: Option<i64>,

    /// Absent for anonymous channel posts
    #[serde(default)]
    pub sender: Option<Sender>,

    /// Message text or media caption; empty when neither is present
    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub entities: Vec<MessageEntity>,

    #[serde(default)]
    pub reply_to: Option<ReplyContext>,
}

impl InboundEvent {
    pub fn is_private(&self) -> bool {
        self.chat_kind.is_private()
    }

    pub fn sender_id(&self) -> Option<i64> {
        self.sender.as_ref().map(|s| s.id)
    }

    pub fn dialog_key(&self) -> DialogKey {
        DialogKey::resolve(self.chat_kind, self.chat_id, self.sender_id(), self.thread_id)
    }

    /// Reply target: same chat and thread, anchored to this message.
    pub fn reply_target(&self) -> ChatTarget {
        ChatTarget::new(self.chat_id, self.chat_kind)
            .with_thread(self.thread_id)
            .replying_to(Some(self.message_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,

    #[serde(default)]
    pub handle: Option<String>,

    #[serde(default)]
    pub first_name: Option<String>,

    #[serde(default)]
    pub last_name: Option<String>,

    #[serde(default)]
    pub is_bot: bool,
}

impl Sender {
    /// First and last name joined, when either is present.
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// `@handle`
    Mention,
    /// A name linked to a user without a handle
    TextMention,
    /// `/command` or `/command@handle`
    BotCommand,
    #[serde(other)]
    Other,
}

/// An annotated span of the message text.
///
/// Offsets count UTF-16 code units and are not validated; consumers must
/// treat out-of-range spans as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntity {
    pub kind: EntityKind,
    pub offset: i64,
    pub length: i64,
    /// Set for text mentions
    #[serde(default)]
    pub user_id: Option<i64>,
}

/// Author of the message being replied to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyContext {
    #[serde(default)]
    pub from_id: Option<i64>,

    #[serde(default)]
    pub from_handle: Option<String>,

    #[serde(default)]
    pub from_is_bot: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_joins_parts() {
        let mut sender = Sender {
            id: 1,
            handle: Some("ann".into()),
            first_name: Some("Ann".into()),
            last_name: Some("Lee".into()),
            is_bot: false,
        };
        assert_eq!(sender.display_name().as_deref(), Some("Ann Lee"));
        sender.last_name = Some("  ".into());
        assert_eq!(sender.display_name().as_deref(), Some("Ann"));
        sender.first_name = None;
        assert_eq!(sender.display_name(), None);
    }

    fn event(kind: ChatKind, thread_id: Option<i64>) -> InboundEvent {
        InboundEvent {
            chat_id: -200,
            chat_kind: kind,
            message_id: 17,
            thread_id,
            sender: Some(Sender {
                id: 9,
                handle: Some("neo".into()),
                first_name: Some("Thomas".into()),
                last_name: None,
                is_bot: false,
            }),
            text: "hello".into(),
            entities: vec![],
            reply_to: None,
        }
    }

    #[test]
    fn dialog_key_uses_thread() {
        assert_eq!(event(ChatKind::Supergroup, Some(4)).dialog_key().as_str(), "-200:4");
        assert_eq!(event(ChatKind::Group, None).dialog_key().as_str(), "-200");
    }

    #[test]
    fn reply_target_anchors_to_message() {
        let target = event(ChatKind::Supergroup, Some(4)).reply_target();
        assert_eq!(target.chat_id, -200);
        assert_eq!(target.thread_id, Some(4));
        assert_eq!(target.reply_to, Some(17));
    }
}
