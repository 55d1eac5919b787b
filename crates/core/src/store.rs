//! Store trait: the persistence collaborator.
//!
//! Every entity the engine reads or writes is owned by the store. Writes are
//! additive (turns, summaries) or targeted field overwrites (settings,
//! profiles) so that overlapping retries of the same event cannot clobber
//! each other with a stale full document.

use crate::dialog::{DialogKey, DialogSettings, Mode, Scope};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Author role of a persisted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One authored message in a dialog. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub dialog_key: DialogKey,

    /// Millisecond timestamp; the store breaks ties by insertion order
    pub sequence_position: i64,

    pub role: TurnRole,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_handle: Option<String>,

    pub created_at: DateTime<Utc>,

    /// After this instant the store may purge the turn
    pub expire_at: DateTime<Utc>,
}

impl Turn {
    fn new(dialog_key: DialogKey, role: TurnRole, content: String, retention: Duration) -> Self {
        let now = Utc::now();
        Self {
            dialog_key,
            sequence_position: now.timestamp_millis(),
            role,
            content,
            speaker_id: None,
            speaker_handle: None,
            created_at: now,
            expire_at: expiry(now, retention),
        }
    }

    /// A user turn authored by `speaker_id`.
    pub fn user(
        dialog_key: DialogKey,
        content: impl Into<String>,
        speaker_id: Option<String>,
        speaker_handle: Option<String>,
        retention: Duration,
    ) -> Self {
        let mut turn = Self::new(dialog_key, TurnRole::User, content.into(), retention);
        turn.speaker_id = speaker_id;
        turn.speaker_handle = speaker_handle;
        turn
    }

    pub fn assistant(dialog_key: DialogKey, content: impl Into<String>, retention: Duration) -> Self {
        Self::new(dialog_key, TurnRole::Assistant, content.into(), retention)
    }

    /// Override the ordering position (imports, tests).
    pub fn at_position(mut self, position: i64) -> Self {
        self.sequence_position = position;
        self
    }
}

/// `now + retention`, saturating at the latest representable instant.
pub fn expiry(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    now.checked_add_signed(retention).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A digest of older turns carried forward in the preamble. Latest wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingSummary {
    pub dialog_key: DialogKey,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
}

impl RollingSummary {
    pub fn new(dialog_key: DialogKey, text: impl Into<String>, retention: Duration) -> Self {
        let now = Utc::now();
        Self {
            dialog_key,
            text: text.into(),
            created_at: now,
            expire_at: expiry(now, retention),
        }
    }
}

/// Durable per-user memory, shared by every dialog the user takes part in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub handle: Option<String>,

    #[serde(default)]
    pub communication_style: String,

    #[serde(default)]
    pub interests: Vec<String>,

    #[serde(default)]
    pub long_term_summary: String,

    #[serde(default)]
    pub last_topics: Vec<String>,

    #[serde(default)]
    pub message_count: u64,

    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            handle: None,
            communication_style: String::new(),
            interests: Vec::new(),
            long_term_summary: String::new(),
            last_topics: Vec::new(),
            message_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether any learned field is filled in.
    pub fn has_memory(&self) -> bool {
        !self.communication_style.trim().is_empty()
            || !self.interests.is_empty()
            || !self.long_term_summary.trim().is_empty()
            || !self.last_topics.is_empty()
    }

    /// Apply a partial update in place. Used by store implementations.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(name) = &update.display_name {
            self.display_name = Some(name.clone());
        }
        if let Some(handle) = &update.handle {
            self.handle = Some(handle.clone());
        }
        if let Some(style) = &update.communication_style {
            self.communication_style = style.clone();
        }
        if let Some(interests) = &update.interests {
            self.interests = interests.clone();
        }
        if let Some(summary) = &update.long_term_summary {
            self.long_term_summary = summary.clone();
        }
        if let Some(topics) = &update.last_topics {
            self.last_topics = topics.clone();
        }
        if update.increment_message_count {
            self.message_count += 1;
        }
        self.updated_at = Utc::now();
    }
}

/// Field-level profile update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub handle: Option<String>,
    pub communication_style: Option<String>,
    pub interests: Option<Vec<String>>,
    pub long_term_summary: Option<String>,
    pub last_topics: Option<Vec<String>>,
    pub increment_message_count: bool,
}

impl ProfileUpdate {
    pub fn names(display_name: Option<String>, handle: Option<String>) -> Self {
        Self {
            display_name,
            handle,
            ..Self::default()
        }
    }

    pub fn message_authored() -> Self {
        Self {
            increment_message_count: true,
            ..Self::default()
        }
    }

    pub fn with_long_term_summary(mut self, summary: impl Into<String>) -> Self {
        self.long_term_summary = Some(summary.into());
        self
    }

    pub fn with_last_topics(mut self, topics: Vec<String>) -> Self {
        self.last_topics = Some(topics);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The persistence collaborator.
///
/// All "get" methods return `Ok(None)` on a miss; all writes create the
/// record when it does not exist yet.
#[async_trait]
pub trait Store: Send + Sync {
    /// A human-readable backend name (e.g., "sqlite").
    fn name(&self) -> &str;

    async fn get_settings(&self, key: &DialogKey) -> Result<Option<DialogSettings>, StoreError>;

    /// Return the stored settings, inserting `initial` if there are none.
    async fn settings_or_insert(&self, initial: DialogSettings) -> Result<DialogSettings, StoreError>;

    /// Overwrite only the mode. Inserts `initial` with the new mode if absent.
    async fn set_mode(&self, initial: DialogSettings, mode: Mode) -> Result<DialogSettings, StoreError>;

    /// Overwrite only the scope. Inserts `initial` with the new scope if absent.
    async fn set_scope(&self, initial: DialogSettings, scope: Scope) -> Result<DialogSettings, StoreError>;

    async fn append_turn(&self, turn: &Turn) -> Result<(), StoreError>;

    /// The `limit` most recent turns, returned oldest first.
    async fn recent_turns(&self, key: &DialogKey, limit: usize) -> Result<Vec<Turn>, StoreError>;

    async fn append_summary(&self, summary: &RollingSummary) -> Result<(), StoreError>;

    async fn latest_summary(&self, key: &DialogKey) -> Result<Option<RollingSummary>, StoreError>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Apply a partial update, creating the profile if needed.
    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), StoreError>;

    /// Delete turns and summaries whose `expire_at` is at or before `now`.
    /// Returns the number of records removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
