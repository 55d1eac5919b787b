//! Parsing Telegram `Update` payloads into [`InboundEvent`]s.
//!
//! Only what the engine needs is modelled. Unknown fields are ignored and
//! every optional field may be absent. A single malformed entity is dropped
//! rather than failing the whole update.

use parley_core::error::ChannelError;
use parley_core::{ChatKind, EntityKind, InboundEvent, MessageEntity, ReplyContext, Sender};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    message: Option<TgMessage>,
    #[serde(default)]
    edited_message: Option<TgMessage>,
    #[serde(default)]
    channel_post: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    #[serde(default)]
    message_id: Option<i64>,
    #[serde(default)]
    message_thread_id: Option<i64>,
    #[serde(default)]
    chat: Option<TgChat>,
    #[serde(default)]
    from: Option<TgUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    entities: Vec<serde_json::Value>,
    #[serde(default)]
    caption_entities: Vec<serde_json::Value>,
    #[serde(default)]
    reply_to_message: Option<Box<TgMessage>>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    #[serde(default)]
    id: Option<i64>,
    #[serde(rename = "type", default)]
    kind: Option<ChatKind>,
}

#[derive(Debug, Clone, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgEntity {
    #[serde(rename = "type")]
    kind: EntityKind,
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    length: i64,
    #[serde(default)]
    user: Option<TgUser>,
}

impl From<TgUser> for Sender {
    fn from(u: TgUser) -> Self {
        Sender {
            id: u.id,
            handle: u.username,
            first_name: u.first_name,
            last_name: u.last_name,
            is_bot: u.is_bot,
        }
    }
}

fn entities(raw: Vec<serde_json::Value>) -> Vec<MessageEntity> {
    raw.into_iter()
        .filter_map(|v| serde_json::from_value::<TgEntity>(v).ok())
        .map(|e| MessageEntity {
            kind: e.kind,
            offset: e.offset,
            length: e.length,
            user_id: e.user.map(|u| u.id),
        })
        .collect()
}

/// Parse a raw update body.
///
/// Fails with [`ChannelError::InvalidPayload`] when the body is not JSON,
/// carries no message, or the message lacks a chat or message id.
pub fn parse_update(raw: &str) -> Result<InboundEvent, ChannelError> {
    let update: Update = serde_json::from_str(raw)
        .map_err(|e| ChannelError::InvalidPayload(format!("not an update: {e}")))?;

    let msg = update
        .message
        .or(update.edited_message)
        .or(update.channel_post)
        .ok_or_else(|| ChannelError::InvalidPayload("no message in update".into()))?;

    let chat = msg
        .chat
        .ok_or_else(|| ChannelError::InvalidPayload("message without chat".into()))?;
    let chat_id = chat
        .id
        .ok_or_else(|| ChannelError::InvalidPayload("chat without id".into()))?;
    let message_id = msg
        .message_id
        .ok_or_else(|| ChannelError::InvalidPayload("message without id".into()))?;

    let (text, raw_entities) = match (msg.text, msg.caption) {
        (Some(text), _) if !text.is_empty() => (text, msg.entities),
        (_, Some(caption)) => (caption, msg.caption_entities),
        _ => (String::new(), Vec::new()),
    };

    let reply_to = msg.reply_to_message.and_then(|r| r.from).map(|from| ReplyContext {
        from_id: Some(from.id),
        from_handle: from.username,
        from_is_bot: from.is_bot,
    });

    Ok(InboundEvent {
        chat_id,
        chat_kind: chat.kind.unwrap_or(ChatKind::Unknown),
        message_id,
        thread_id: msg.message_thread_id,
        sender: msg.from.map(Sender::from),
        text,
        entities: entities(raw_entities),
        reply_to,
    })
}
