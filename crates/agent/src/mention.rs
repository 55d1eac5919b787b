//! Decides whether a group message addresses the assistant.

use parley_core::inbound::{EntityKind, MessageEntity, ReplyContext};

/// Who the assistant is, as seen from inside a chat.
#[derive(Debug, Clone, Default)]
pub struct BotIdentity {
    /// Lowercased, without the leading `@`
    pub handle: Option<String>,
    pub id: Option<i64>,
}

impl BotIdentity {
    pub fn new(handle: Option<&str>, id: Option<i64>) -> Self {
        let handle = handle
            .map(|h| h.trim().trim_start_matches('@').to_lowercase())
            .filter(|h| !h.is_empty());
        Self { handle, id }
    }
}

/// Returns true when `text` mentions the bot, a mention-like entity points
/// at it, or the message replies to something the bot wrote.
///
/// Entity offsets are UTF-16 code units as sent by Telegram. A span that
/// cannot be sliced out of `text` counts as a non-match.
pub fn is_mentioned(
    text: &str,
    entities: &[MessageEntity],
    bot: &BotIdentity,
    reply: Option<&ReplyContext>,
) -> bool {
    let handle = bot.handle.as_deref();

    if let Some(handle) = handle {
        if text.to_lowercase().contains(&format!("@{handle}")) {
            return true;
        }
    }

    let entity_hit = entities.iter().any(|entity| match entity.kind {
        EntityKind::Mention | EntityKind::TextMention | EntityKind::BotCommand => {
            if entity.kind == EntityKind::TextMention
                && bot.id.is_some()
                && entity.user_id == bot.id
            {
                return true;
            }
            match (handle, utf16_slice(text, entity.offset, entity.length)) {
                (Some(handle), Some(fragment)) => fragment.to_lowercase().contains(handle),
                _ => false,
            }
        }
        EntityKind::Other => false,
    });
    if entity_hit {
        return true;
    }

    match reply {
        Some(reply) if reply.from_is_bot => {
            if bot.id.is_some() && reply.from_id == bot.id {
                return true;
            }
            match (handle, reply.from_handle.as_deref()) {
                (Some(handle), Some(from)) => from.trim_start_matches('@').eq_ignore_ascii_case(handle),
                _ => false,
            }
        }
        _ => false,
    }
}

/// Slice `text` by a UTF-16 offset and length.
///
/// `None` for negative or out-of-range spans and for spans that cut a
/// surrogate pair in half.
fn utf16_slice(text: &str, offset: i64, length: i64) -> Option<String> {
    let start = usize::try_from(offset).ok()?;
    let len = usize::try_from(length).ok()?;
    let end = start.checked_add(len)?;
    let units: Vec<u16> = text.encode_utf16().collect();
    let span = units.get(start..end)?;
    String::from_utf16(span).ok()
}
