//! SQLite store.
//!
//! One database file, four tables:
//! - `dialog_settings`: one row per dialog key
//! - `turns`: append-only history, ordered by `(position, id)`
//! - `summaries`: append-only rolling summaries, latest by `id`
//! - `profiles`: one row per user, updated field by field
//!
//! Expiry instants are stored as unix milliseconds so the purge is a plain
//! integer comparison.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parley_core::error::StoreError;
use parley_core::{
    DialogKey, DialogSettings, Mode, ProfileUpdate, RollingSummary, Scope, Store, Turn, TurnRole,
    UserProfile,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A durable [`Store`] backed by a single SQLite file.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Each connection to `:memory:` is a separate database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Open the database file at `path`, creating parent directories.
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("Cannot create {}: {e}", parent.display())))?;
        }
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements: [(&str, &str); 6] = [
            (
                "dialog_settings table",
                r#"
                CREATE TABLE IF NOT EXISTS dialog_settings (
                    dialog_key  TEXT PRIMARY KEY NOT NULL,
                    mode        TEXT NOT NULL,
                    scope       TEXT NOT NULL,
                    updated_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "turns table",
                r#"
                CREATE TABLE IF NOT EXISTS turns (
                    id              INTEGER PRIMARY KEY AUTOINCREMENT,
                    dialog_key      TEXT NOT NULL,
                    position        INTEGER NOT NULL,
                    role            TEXT NOT NULL,
                    content         TEXT NOT NULL,
                    speaker_id      TEXT,
                    speaker_handle  TEXT,
                    created_at      TEXT NOT NULL,
                    expire_at       INTEGER NOT NULL
                )
                "#,
            ),
            (
                "turns index",
                "CREATE INDEX IF NOT EXISTS idx_turns_dialog ON turns(dialog_key, position DESC, id DESC)",
            ),
            (
                "summaries table",
                r#"
                CREATE TABLE IF NOT EXISTS summaries (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    dialog_key  TEXT NOT NULL,
                    text        TEXT NOT NULL,
                    created_at  TEXT NOT NULL,
                    expire_at   INTEGER NOT NULL
                )
                "#,
            ),
            (
                "summaries index",
                "CREATE INDEX IF NOT EXISTS idx_summaries_dialog ON summaries(dialog_key, id DESC)",
            ),
            (
                "profiles table",
                r#"
                CREATE TABLE IF NOT EXISTS profiles (
                    user_id              TEXT PRIMARY KEY NOT NULL,
                    display_name         TEXT,
                    handle               TEXT,
                    communication_style  TEXT NOT NULL DEFAULT '',
                    interests            TEXT NOT NULL DEFAULT '[]',
                    long_term_summary    TEXT NOT NULL DEFAULT '',
                    last_topics          TEXT NOT NULL DEFAULT '[]',
                    message_count        INTEGER NOT NULL DEFAULT 0,
                    updated_at           TEXT NOT NULL
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    async fn fetch_settings(&self, key: &DialogKey) -> Result<Option<DialogSettings>, StoreError> {
        let row = sqlx::query(
            "SELECT dialog_key, mode, scope, updated_at FROM dialog_settings WHERE dialog_key = ?1",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("select settings: {e}")))?;

        row.as_ref().map(Self::row_to_settings).transpose()
    }

    async fn require_settings(&self, key: &DialogKey) -> Result<DialogSettings, StoreError> {
        self.fetch_settings(key)
            .await?
            .ok_or_else(|| StoreError::QueryFailed(format!("settings for {key} vanished")))
    }

    /// Upsert settings, overwriting only `column` on conflict.
    async fn upsert_setting(
        &self,
        initial: &DialogSettings,
        mode: Mode,
        scope: Scope,
        column: &str,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO dialog_settings (dialog_key, mode, scope, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(dialog_key) DO UPDATE SET {column} = excluded.{column}, updated_at = excluded.updated_at"
        );
        sqlx::query(&sql)
            .bind(initial.dialog_key.as_str())
            .bind(mode.as_str())
            .bind(scope.as_str())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("update {column}: {e}")))?;
        Ok(())
    }

    fn row_to_settings(row: &sqlx::sqlite::SqliteRow) -> Result<DialogSettings, StoreError> {
        let key: String = column(row, "dialog_key")?;
        let mode: String = column(row, "mode")?;
        let scope: String = column(row, "scope")?;
        let updated_at: String = column(row, "updated_at")?;

        Ok(DialogSettings {
            dialog_key: DialogKey::from(key.as_str()),
            mode: mode
                .parse()
                .map_err(|e| StoreError::QueryFailed(format!("mode column: {e}")))?,
            scope: scope
                .parse()
                .map_err(|e| StoreError::QueryFailed(format!("scope column: {e}")))?,
            updated_at: parse_rfc3339(&updated_at),
        })
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, StoreError> {
        let key: String = column(row, "dialog_key")?;
        let role: String = column(row, "role")?;
        let created_at: String = column(row, "created_at")?;
        let expire_at: i64 = column(row, "expire_at")?;

        let role = match role.as_str() {
            "user" => TurnRole::User,
            "assistant" => TurnRole::Assistant,
            other => return Err(StoreError::QueryFailed(format!("role column: {other}"))),
        };

        Ok(Turn {
            dialog_key: DialogKey::from(key.as_str()),
            sequence_position: column(row, "position")?,
            role,
            content: column(row, "content")?,
            speaker_id: column(row, "speaker_id")?,
            speaker_handle: column(row, "speaker_handle")?,
            created_at: parse_rfc3339(&created_at),
            expire_at: from_millis(expire_at),
        })
    }

    fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<UserProfile, StoreError> {
        let interests: String = column(row, "interests")?;
        let last_topics: String = column(row, "last_topics")?;
        let message_count: i64 = column(row, "message_count")?;
        let updated_at: String = column(row, "updated_at")?;

        Ok(UserProfile {
            user_id: column(row, "user_id")?,
            display_name: column(row, "display_name")?,
            handle: column(row, "handle")?,
            communication_style: column(row, "communication_style")?,
            interests: serde_json::from_str(&interests).unwrap_or_default(),
            long_term_summary: column(row, "long_term_summary")?,
            last_topics: serde_json::from_str(&last_topics).unwrap_or_default(),
            message_count: message_count.max(0) as u64,
            updated_at: parse_rfc3339(&updated_at),
        })
    }
}

fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn to_json(list: &Option<Vec<String>>) -> Result<Option<String>, StoreError> {
    list.as_ref()
        .map(|l| serde_json::to_string(l))
        .transpose()
        .map_err(|e| StoreError::Storage(format!("list serialization: {e}")))
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_settings(&self, key: &DialogKey) -> Result<Option<DialogSettings>, StoreError> {
        self.fetch_settings(key).await
    }

    async fn settings_or_insert(&self, initial: DialogSettings) -> Result<DialogSettings, StoreError> {
        sqlx::query(
            "INSERT INTO dialog_settings (dialog_key, mode, scope, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(dialog_key) DO NOTHING",
        )
        .bind(initial.dialog_key.as_str())
        .bind(initial.mode.as_str())
        .bind(initial.scope.as_str())
        .bind(initial.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("insert settings: {e}")))?;

        self.require_settings(&initial.dialog_key).await
    }

    async fn set_mode(&self, initial: DialogSettings, mode: Mode) -> Result<DialogSettings, StoreError> {
        self.upsert_setting(&initial, mode, initial.scope, "mode").await?;
        self.require_settings(&initial.dialog_key).await
    }

    async fn set_scope(&self, initial: DialogSettings, scope: Scope) -> Result<DialogSettings, StoreError> {
        self.upsert_setting(&initial, initial.mode, scope, "scope").await?;
        self.require_settings(&initial.dialog_key).await
    }

    async fn append_turn(&self, turn: &Turn) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO turns (dialog_key, position, role, content, speaker_id, speaker_handle, created_at, expire_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(turn.dialog_key.as_str())
        .bind(turn.sequence_position)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(&turn.speaker_id)
        .bind(&turn.speaker_handle)
        .bind(turn.created_at.to_rfc3339())
        .bind(turn.expire_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("insert turn: {e}")))?;
        Ok(())
    }

    async fn recent_turns(&self, key: &DialogKey, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT dialog_key, position, role, content, speaker_id, speaker_handle, created_at, expire_at
            FROM turns
            WHERE dialog_key = ?1
            ORDER BY position DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(key.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("select turns: {e}")))?;

        let mut turns = rows
            .iter()
            .map(Self::row_to_turn)
            .collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn append_summary(&self, summary: &RollingSummary) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO summaries (dialog_key, text, created_at, expire_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(summary.dialog_key.as_str())
        .bind(&summary.text)
        .bind(summary.created_at.to_rfc3339())
        .bind(summary.expire_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("insert summary: {e}")))?;
        Ok(())
    }

    async fn latest_summary(&self, key: &DialogKey) -> Result<Option<RollingSummary>, StoreError> {
        let row = sqlx::query(
            "SELECT dialog_key, text, created_at, expire_at FROM summaries \
             WHERE dialog_key = ?1 ORDER BY id DESC LIMIT 1",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("select summary: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let key: String = column(&row, "dialog_key")?;
        let created_at: String = column(&row, "created_at")?;
        let expire_at: i64 = column(&row, "expire_at")?;
        Ok(Some(RollingSummary {
            dialog_key: DialogKey::from(key.as_str()),
            text: column(&row, "text")?,
            created_at: parse_rfc3339(&created_at),
            expire_at: from_millis(expire_at),
        }))
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query("SELECT * FROM profiles WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("select profile: {e}")))?;

        row.as_ref().map(Self::row_to_profile).transpose()
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO profiles (user_id, updated_at) VALUES (?1, ?2) ON CONFLICT(user_id) DO NOTHING")
            .bind(user_id)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("insert profile: {e}")))?;

        sqlx::query(
            r#"
            UPDATE profiles SET
                display_name        = COALESCE(?1, display_name),
                handle              = COALESCE(?2, handle),
                communication_style = COALESCE(?3, communication_style),
                interests           = COALESCE(?4, interests),
                long_term_summary   = COALESCE(?5, long_term_summary),
                last_topics         = COALESCE(?6, last_topics),
                message_count       = message_count + ?7,
                updated_at          = ?8
            WHERE user_id = ?9
            "#,
        )
        .bind(&update.display_name)
        .bind(&update.handle)
        .bind(&update.communication_style)
        .bind(to_json(&update.interests)?)
        .bind(&update.long_term_summary)
        .bind(to_json(&update.last_topics)?)
        .bind(i64::from(update.increment_message_count))
        .bind(&now)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("update profile: {e}")))?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = now.timestamp_millis();
        let mut removed = 0;
        for table in ["turns", "summaries"] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE expire_at <= ?1"))
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(format!("purge {table}: {e}")))?;
            removed += result.rows_affected();
        }
        if removed > 0 {
            info!(removed, "Purged expired records");
        }
        Ok(removed)
    }
}
