//! In-memory store, useful for tests and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::error::StoreError;
use parley_core::{
    DialogKey, DialogSettings, Mode, ProfileUpdate, RollingSummary, Scope, Store, Turn,
    UserProfile,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    settings: HashMap<DialogKey, DialogSettings>,
    /// Per dialog, in insertion order
    turns: HashMap<DialogKey, Vec<Turn>>,
    summaries: HashMap<DialogKey, Vec<RollingSummary>>,
    profiles: HashMap<String, UserProfile>,
}

/// A process-local [`Store`]. Clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every turn of a dialog, oldest first.
    pub async fn all_turns(&self, key: &DialogKey) -> Vec<Turn> {
        let tables = self.tables.read().await;
        let mut turns = tables.turns.get(key).cloned().unwrap_or_default();
        turns.sort_by_key(|t| t.sequence_position);
        turns
    }

    pub async fn summary_count(&self, key: &DialogKey) -> usize {
        self.tables
            .read()
            .await
            .summaries
            .get(key)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_settings(&self, key: &DialogKey) -> Result<Option<DialogSettings>, StoreError> {
        Ok(self.tables.read().await.settings.get(key).cloned())
    }

    async fn settings_or_insert(&self, initial: DialogSettings) -> Result<DialogSettings, StoreError> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .settings
            .entry(initial.dialog_key.clone())
            .or_insert(initial);
        Ok(entry.clone())
    }

    async fn set_mode(&self, initial: DialogSettings, mode: Mode) -> Result<DialogSettings, StoreError> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .settings
            .entry(initial.dialog_key.clone())
            .or_insert(initial);
        entry.mode = mode;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn set_scope(&self, initial: DialogSettings, scope: Scope) -> Result<DialogSettings, StoreError> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .settings
            .entry(initial.dialog_key.clone())
            .or_insert(initial);
        entry.scope = scope;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn append_turn(&self, turn: &Turn) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .turns
            .entry(turn.dialog_key.clone())
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn recent_turns(&self, key: &DialogKey, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let tables = self.tables.read().await;
        let Some(turns) = tables.turns.get(key) else {
            return Ok(Vec::new());
        };
        // Stable sort keeps insertion order for equal positions.
        let mut ordered = turns.clone();
        ordered.sort_by_key(|t| t.sequence_position);
        let skip = ordered.len().saturating_sub(limit);
        Ok(ordered.split_off(skip))
    }

    async fn append_summary(&self, summary: &RollingSummary) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .summaries
            .entry(summary.dialog_key.clone())
            .or_default()
            .push(summary.clone());
        Ok(())
    }

    async fn latest_summary(&self, key: &DialogKey) -> Result<Option<RollingSummary>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.summaries.get(key).and_then(|s| s.last()).cloned())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.tables.read().await.profiles.get(user_id).cloned())
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id))
            .apply(update);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let mut removed = 0u64;
        for turns in tables.turns.values_mut() {
            let before = turns.len();
            turns.retain(|t| t.expire_at > now);
            removed += (before - turns.len()) as u64;
        }
        for summaries in tables.summaries.values_mut() {
            let before = summaries.len();
            summaries.retain(|s| s.expire_at > now);
            removed += (before - summaries.len()) as u64;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    #[tokio::test]
    async fn settings_are_created_once() {
        conformance::settings_are_created_once(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn field_updates_are_targeted() {
        conformance::field_updates_are_targeted(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn recent_turns_are_bounded_and_chronological() {
        conformance::recent_turns_are_bounded_and_chronological(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn equal_positions_keep_insertion_order() {
        conformance::equal_positions_keep_insertion_order(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn latest_summary_wins() {
        conformance::latest_summary_wins(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn profile_updates_are_partial() {
        conformance::profile_updates_are_partial(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        conformance::purge_removes_only_expired(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn clones_share_tables() {
        let a = InMemoryStore::new();
        let b = a.clone();
        a.append_turn(&Turn::assistant("1".into(), "hi", chrono::Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(b.all_turns(&DialogKey::from("1")).await.len(), 1);
    }
}
