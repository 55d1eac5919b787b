//! Dialog identity and per-dialog response policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of chat an event arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Unknown,
}

impl ChatKind {
    /// One-to-one conversation with a single user.
    pub fn is_private(self) -> bool {
        matches!(self, ChatKind::Private)
    }
}

/// Stable identifier of a conversation scope.
///
/// Derived from an event, never stored on its own. Edits and retries of the
/// same message always map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DialogKey(String);

impl DialogKey {
    /// Resolve the dialog key for an event.
    ///
    /// Private chats are keyed by the user, threads by `chat:thread`,
    /// everything else by the chat id.
    pub fn resolve(
        kind: ChatKind,
        chat_id: i64,
        user_id: Option<i64>,
        thread_id: Option<i64>,
    ) -> Self {
        match (kind.is_private(), user_id, thread_id) {
            (true, Some(uid), _) => Self(uid.to_string()),
            (_, _, Some(tid)) => Self(format!("{chat_id}:{tid}")),
            _ => Self(chat_id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DialogKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for DialogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the assistant answers at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Off,
    Mention,
    Always,
}

impl Mode {
    /// Initial mode for a dialog seen for the first time.
    pub fn default_for(kind: ChatKind) -> Self {
        if kind.is_private() {
            Mode::Always
        } else {
            Mode::Mention
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Off => "off",
            Mode::Mention => "mention",
            Mode::Always => "always",
        }
    }
}

impl FromStr for Mode {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Mode::Off),
            "mention" => Ok(Mode::Mention),
            "always" => Ok(Mode::Always),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whose turns feed the context in a multi-party dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Only the current requester's messages
    Initiator,
    /// Everyone in the thread, equally
    Thread,
    /// Everyone, with the requester's turns kept longest
    #[default]
    Hybrid,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Initiator => "initiator",
            Scope::Thread => "thread",
            Scope::Hybrid => "hybrid",
        }
    }
}

impl FromStr for Scope {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "initiator" => Ok(Scope::Initiator),
            "thread" => Ok(Scope::Thread),
            "hybrid" => Ok(Scope::Hybrid),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mode or scope value that is not part of the policy vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct UnknownValue(pub String);

/// Persisted response policy for one dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogSettings {
    pub dialog_key: DialogKey,
    pub mode: Mode,
    pub scope: Scope,
    pub updated_at: DateTime<Utc>,
}

impl DialogSettings {
    /// Settings assigned the first time a dialog is seen.
    pub fn initial(dialog_key: DialogKey, kind: ChatKind, scope: Scope) -> Self {
        Self {
            dialog_key,
            mode: Mode::default_for(kind),
            scope,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_chat_keys_by_user() {
        let key = DialogKey::resolve(ChatKind::Private, 555, Some(42), None);
        assert_eq!(key.as_str(), "42");
    }

    #[test]
    fn private_chat_without_user_falls_back_to_chat() {
        let key = DialogKey::resolve(ChatKind::Private, 555, None, None);
        assert_eq!(key.as_str(), "555");
    }

    #[test]
    fn thread_key_joins_chat_and_thread() {
        let key = DialogKey::resolve(ChatKind::Supergroup, -100123, Some(7), Some(9));
        assert_eq!(key.as_str(), "-100123:9");
    }

    #[test]
    fn group_key_is_chat_id() {
        let key = DialogKey::resolve(ChatKind::Group, -42, Some(7), None);
        assert_eq!(key.as_str(), "-42");
    }

    #[test]
    fn resolve_is_stable_across_calls() {
        let inputs = [
            (ChatKind::Private, 1, Some(2), None),
            (ChatKind::Group, -5, Some(2), Some(3)),
            (ChatKind::Channel, -9, None, None),
            (ChatKind::Unknown, 11, None, Some(0)),
        ];
        for (kind, chat, user, thread) in inputs {
            assert_eq!(
                DialogKey::resolve(kind, chat, user, thread),
                DialogKey::resolve(kind, chat, user, thread)
            );
        }
    }

    #[test]
    fn default_mode_depends_on_chat_kind() {
        assert_eq!(Mode::default_for(ChatKind::Private), Mode::Always);
        assert_eq!(Mode::default_for(ChatKind::Group), Mode::Mention);
        assert_eq!(Mode::default_for(ChatKind::Channel), Mode::Mention);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("ALWAYS".parse::<Mode>().unwrap(), Mode::Always);
        assert_eq!("Initiator".parse::<Scope>().unwrap(), Scope::Initiator);
        assert!("loud".parse::<Mode>().is_err());
        assert!("everyone".parse::<Scope>().is_err());
    }

    #[test]
    fn unknown_chat_kind_deserializes() {
        let kind: ChatKind = serde_json::from_str("\"forum\"").unwrap();
        assert_eq!(kind, ChatKind::Unknown);
    }
}
