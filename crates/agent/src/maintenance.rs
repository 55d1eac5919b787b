//! Post-reply memory refresh: the rolling summary and the long-term profile.
//!
//! Runs after the reply is delivered. Every refresh is best-effort, so a
//! failure is logged and never reaches the caller.

use crate::inference::ModelClient;
use crate::pipeline::store_call;
use parley_config::EngineConfig;
use parley_core::dialog::DialogKey;
use parley_core::message::Message;
use parley_core::store::{ProfileUpdate, RollingSummary, Store, Turn, TurnRole};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// History lengths that trigger each refresh, and the windows they read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub summary_min_turns: usize,
    pub summary_window: usize,
    pub profile_min_turns: usize,
    pub profile_window: usize,
    pub topics_window: usize,
    pub max_topics: usize,
}

impl Thresholds {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            summary_min_turns: config.summary_min_turns,
            summary_window: config.summary_window,
            profile_min_turns: config.profile_min_turns,
            profile_window: config.profile_window,
            topics_window: config.topics_window,
            max_topics: config.max_topics,
        }
    }

    /// Turns to fetch so that every threshold and window can be evaluated.
    pub fn fetch_limit(&self) -> usize {
        [
            self.summary_min_turns,
            self.summary_window,
            self.profile_min_turns,
            self.profile_window,
            self.topics_window,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    pub fn plan(&self, history_len: usize, is_private: bool) -> Plan {
        let refresh_summary = history_len >= self.summary_min_turns;
        Plan {
            refresh_summary,
            refresh_profile: refresh_summary && is_private && history_len >= self.profile_min_turns,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// What a maintenance run will attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plan {
    pub refresh_summary: bool,
    pub refresh_profile: bool,
}

/// What a maintenance run actually wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    pub summary_refreshed: bool,
    pub profile_refreshed: bool,
}

pub struct MemoryMaintainer {
    store: Arc<dyn Store>,
    model: Arc<ModelClient>,
    thresholds: Thresholds,
    retention: chrono::Duration,
    store_timeout: Duration,
}

impl MemoryMaintainer {
    pub fn new(store: Arc<dyn Store>, model: Arc<ModelClient>, thresholds: Thresholds) -> Self {
        Self {
            store,
            model,
            thresholds,
            retention: chrono::Duration::days(365),
            store_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Refresh whatever the dialog's history length calls for.
    ///
    /// `requester` is the user whose long-term profile may be rewritten; it
    /// is only considered in private chats.
    pub async fn run(&self, key: &DialogKey, is_private: bool, requester: Option<&str>) -> Report {
        let mut report = Report::default();
        let limit = self.thresholds.fetch_limit();

        let history = match store_call(self.store_timeout, self.store.recent_turns(key, limit)).await {
            Ok(history) => history,
            Err(e) => {
                warn!(dialog_key = %key, error = %e, "Maintenance history fetch failed");
                return report;
            }
        };

        let plan = self.thresholds.plan(history.len(), is_private);
        debug!(dialog_key = %key, turns = history.len(), ?plan, "Maintenance plan");

        if plan.refresh_summary {
            report.summary_refreshed = self.refresh_summary(key, &history).await;
        }
        if let (true, Some(user_id)) = (plan.refresh_profile, requester) {
            report.profile_refreshed = self.refresh_profile(user_id, &history).await;
        }
        report
    }

    async fn refresh_summary(&self, key: &DialogKey, history: &[Turn]) -> bool {
        let window = to_messages(tail(history, self.thresholds.summary_window));
        let text = match self.model.summarize(&window).await {
            Ok(text) => text,
            Err(e) => {
                warn!(dialog_key = %key, error = %e, "Summary refresh failed");
                return false;
            }
        };

        let summary = RollingSummary::new(key.clone(), text, self.retention);
        match store_call(self.store_timeout, self.store.append_summary(&summary)).await {
            Ok(()) => {
                info!(dialog_key = %key, "Rolling summary refreshed");
                true
            }
            Err(e) => {
                warn!(dialog_key = %key, error = %e, "Saving refreshed summary failed");
                false
            }
        }
    }

    async fn refresh_profile(&self, user_id: &str, history: &[Turn]) -> bool {
        let display_name = match store_call(self.store_timeout, self.store.get_profile(user_id)).await {
            Ok(profile) => profile.and_then(|p| p.display_name),
            Err(e) => {
                warn!(user_id, error = %e, "Profile lookup failed, refreshing without a name");
                None
            }
        };

        let long_window = to_messages(tail(history, self.thresholds.profile_window));
        let long_term = self
            .model
            .long_term_summary(&long_window, display_name.as_deref())
            .await
            .map_err(|e| warn!(user_id, error = %e, "Long-term summary failed"))
            .ok();

        let topics_window = to_messages(tail(history, self.thresholds.topics_window));
        let topics = self
            .model
            .extract_topics(&topics_window, self.thresholds.max_topics)
            .await
            .map_err(|e| warn!(user_id, error = %e, "Topic extraction failed"))
            .ok()
            .filter(|t| !t.is_empty());

        let mut update = ProfileUpdate::default();
        if let Some(summary) = long_term {
            update = update.with_long_term_summary(summary);
        }
        if let Some(topics) = topics {
            update = update.with_last_topics(topics);
        }
        if update.is_empty() {
            return false;
        }

        match store_call(self.store_timeout, self.store.update_profile(user_id, &update)).await {
            Ok(()) => {
                info!(user_id, "Long-term profile refreshed");
                true
            }
            Err(e) => {
                warn!(user_id, error = %e, "Saving long-term profile failed");
                false
            }
        }
    }
}

fn tail(turns: &[Turn], n: usize) -> &[Turn] {
    &turns[turns.len().saturating_sub(n)..]
}

fn to_messages(turns: &[Turn]) -> Vec<Message> {
    turns
        .iter()
        .map(|t| match t.role {
            TurnRole::User => Message::user(&t.content),
            TurnRole::Assistant => Message::assistant(&t.content),
        })
        .collect()
}
