//! Store implementations for parley.
//!
//! - [`InMemoryStore`]: process-local, for tests and `--ephemeral` runs
//! - [`SqliteStore`]: durable single-file store (feature `sqlite`, on by default)

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Behaviour every [`parley_core::Store`] must share, run against each backend.
#[cfg(test)]
pub(crate) mod conformance {
    use chrono::{Duration, Utc};
    use parley_core::{
        ChatKind, DialogKey, DialogSettings, Mode, ProfileUpdate, RollingSummary, Scope, Store,
        Turn, TurnRole,
    };

    fn year() -> Duration {
        Duration::days(365)
    }

    pub async fn settings_are_created_once(store: &dyn Store) {
        let key = DialogKey::from("-100");
        assert!(store.get_settings(&key).await.unwrap().is_none());

        let initial = DialogSettings::initial(key.clone(), ChatKind::Group, Scope::Hybrid);
        let first = store.settings_or_insert(initial.clone()).await.unwrap();
        assert_eq!(first.mode, Mode::Mention);

        store.set_mode(initial.clone(), Mode::Always).await.unwrap();
        let again = store.settings_or_insert(initial).await.unwrap();
        assert_eq!(again.mode, Mode::Always);
    }

    pub async fn field_updates_are_targeted(store: &dyn Store) {
        let key = DialogKey::from("-200:5");
        let initial = DialogSettings::initial(key.clone(), ChatKind::Supergroup, Scope::Hybrid);

        // Absent record: created from the initial value with the new field.
        let s = store.set_scope(initial.clone(), Scope::Initiator).await.unwrap();
        assert_eq!((s.mode, s.scope), (Mode::Mention, Scope::Initiator));

        let s = store.set_mode(initial.clone(), Mode::Off).await.unwrap();
        assert_eq!((s.mode, s.scope), (Mode::Off, Scope::Initiator));

        // Replaying the same command is a no-op on the outcome.
        let s = store.set_scope(initial, Scope::Initiator).await.unwrap();
        assert_eq!((s.mode, s.scope), (Mode::Off, Scope::Initiator));
    }

    pub async fn recent_turns_are_bounded_and_chronological(store: &dyn Store) {
        let key = DialogKey::from("42");
        for i in 0..10 {
            let turn = Turn::user(key.clone(), format!("m{i}"), Some("42".into()), None, year())
                .at_position(1_000 + i);
            store.append_turn(&turn).await.unwrap();
        }
        let other = Turn::assistant("43".into(), "elsewhere", year());
        store.append_turn(&other).await.unwrap();

        let turns = store.recent_turns(&key, 4).await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m6", "m7", "m8", "m9"]);
        assert!(turns.iter().all(|t| t.role == TurnRole::User));
    }

    pub async fn equal_positions_keep_insertion_order(store: &dyn Store) {
        let key = DialogKey::from("7");
        store
            .append_turn(&Turn::user(key.clone(), "question", None, None, year()).at_position(5))
            .await
            .unwrap();
        store
            .append_turn(&Turn::assistant(key.clone(), "answer", year()).at_position(5))
            .await
            .unwrap();
        let turns = store.recent_turns(&key, 10).await.unwrap();
        assert_eq!(turns[0].content, "question");
        assert_eq!(turns[1].content, "answer");
    }

    pub async fn latest_summary_wins(store: &dyn Store) {
        let key = DialogKey::from("-300");
        assert!(store.latest_summary(&key).await.unwrap().is_none());
        store
            .append_summary(&RollingSummary::new(key.clone(), "old", year()))
            .await
            .unwrap();
        store
            .append_summary(&RollingSummary::new(key.clone(), "new", year()))
            .await
            .unwrap();
        assert_eq!(store.latest_summary(&key).await.unwrap().unwrap().text, "new");
    }

    pub async fn profile_updates_are_partial(store: &dyn Store) {
        assert!(store.get_profile("9").await.unwrap().is_none());

        store
            .update_profile("9", &ProfileUpdate::names(Some("Ann".into()), Some("ann".into())))
            .await
            .unwrap();
        store
            .update_profile("9", &ProfileUpdate::message_authored())
            .await
            .unwrap();
        store
            .update_profile(
                "9",
                &ProfileUpdate::default()
                    .with_long_term_summary("likes chess")
                    .with_last_topics(vec!["chess".into(), "openings".into()]),
            )
            .await
            .unwrap();
        store
            .update_profile("9", &ProfileUpdate::message_authored())
            .await
            .unwrap();
        // A names refresh without a handle keeps the stored one.
        store
            .update_profile("9", &ProfileUpdate::names(Some("Anna".into()), None))
            .await
            .unwrap();

        let p = store.get_profile("9").await.unwrap().unwrap();
        assert_eq!(p.display_name.as_deref(), Some("Anna"));
        assert_eq!(p.handle.as_deref(), Some("ann"));
        assert_eq!(p.long_term_summary, "likes chess");
        assert_eq!(p.last_topics, vec!["chess".to_string(), "openings".to_string()]);
        assert_eq!(p.message_count, 2);
    }

    pub async fn purge_removes_only_expired(store: &dyn Store) {
        let key = DialogKey::from("11");
        let mut stale = Turn::user(key.clone(), "stale", None, None, year());
        stale.expire_at = Utc::now() - Duration::days(1);
        store.append_turn(&stale).await.unwrap();
        store
            .append_turn(&Turn::assistant(key.clone(), "fresh", year()))
            .await
            .unwrap();
        let mut old_summary = RollingSummary::new(key.clone(), "gone", year());
        old_summary.expire_at = Utc::now() - Duration::hours(1);
        store.append_summary(&old_summary).await.unwrap();

        let removed = store.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(removed, 2);

        let turns = store.recent_turns(&key, 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "fresh");
        assert!(store.latest_summary(&key).await.unwrap().is_none());
    }
}
