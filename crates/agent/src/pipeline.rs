//! The per-event processing pipeline.
//!
//! Every step that talks to a collaborator is bounded by a timeout and owns
//! its failures: a failed step is logged and processing continues with a
//! default, so one bad event never blocks the next.

use crate::command::{Command, should_respond};
use crate::context::assembler::{AssemblyInput, ContextAssembler, ProfileCache, Requester, authors};
use crate::context::eviction::{BudgetEvictor, EvictionPolicy};
use crate::context::token::TokenEstimator;
use crate::inference::{ModelClient, is_unusable};
use crate::maintenance::{MemoryMaintainer, Thresholds};
use crate::mention::{BotIdentity, is_mentioned};
use chrono::Utc;
use parley_channels::parse_update;
use parley_config::AppConfig;
use parley_core::channel::Channel;
use parley_core::dialog::{DialogSettings, Scope};
use parley_core::error::StoreError;
use parley_core::inbound::InboundEvent;
use parley_core::message::Message;
use parley_core::provider::Provider;
use parley_core::store::{ProfileUpdate, RollingSummary, Store, Turn};
use parley_core::tool::ToolRegistry;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Run a store call under `timeout`; elapsing is a [`StoreError::Timeout`].
pub(crate) async fn store_call<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout.as_secs())),
    }
}

/// How an event was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Malformed or empty payload; acknowledged without side effects
    Ignored(String),
    /// A policy command was applied and confirmed
    Command(Command),
    /// The response gate said no
    Skipped,
    /// A reply was produced and handed to the transport
    Replied { chunks: usize, evicted: usize },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ignored(reason) => write!(f, "ignored: {reason}"),
            Outcome::Command(cmd) => write!(f, "command: {cmd}"),
            Outcome::Skipped => f.write_str("skipped"),
            Outcome::Replied { chunks, evicted } => {
                write!(f, "replied: {chunks} chunk(s), {evicted} turn(s) evicted")
            }
        }
    }
}

/// Handles one inbound event at a time. Safe to share across tasks.
pub struct MessageProcessor {
    store: Arc<dyn Store>,
    channel: Arc<dyn Channel>,
    model: Arc<ModelClient>,
    tools: Arc<ToolRegistry>,
    assembler: ContextAssembler,
    evictor: BudgetEvictor,
    maintainer: MemoryMaintainer,
    bot: BotIdentity,
    history_limit: usize,
    default_scope: Scope,
    fallback_notice: String,
    retention: chrono::Duration,
    store_timeout: Duration,
    transport_timeout: Duration,
}

impl MessageProcessor {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn Store>,
        provider: Arc<dyn Provider>,
        channel: Arc<dyn Channel>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let engine = &config.engine;
        let store_timeout = Duration::from_secs(engine.store_timeout_secs);
        let retention = chrono::Duration::days(
            config.storage.retention_days.clamp(1, parley_config::MAX_RETENTION_DAYS),
        );
        let model = Arc::new(ModelClient::from_config(provider, &config.anthropic));
        let evictor = BudgetEvictor::new(TokenEstimator::from_config(engine), engine.max_context_tokens)
            .with_summary_batch(engine.eviction_summary_batch);
        let maintainer = MemoryMaintainer::new(store.clone(), model.clone(), Thresholds::from_config(engine))
            .with_retention(retention)
            .with_store_timeout(store_timeout);

        Self {
            store,
            channel,
            model,
            tools,
            assembler: ContextAssembler::from_config(engine),
            evictor,
            maintainer,
            bot: BotIdentity::new(config.telegram.bot_username.as_deref(), config.telegram.bot_id),
            history_limit: engine.history_limit,
            default_scope: engine.default_scope,
            fallback_notice: engine.fallback_notice.clone(),
            retention,
            store_timeout,
            transport_timeout: Duration::from_secs(config.telegram.timeout_secs),
        }
    }

    /// Parse a raw update body and handle it.
    pub async fn process(&self, raw: &str) -> Outcome {
        match parse_update(raw) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                info!(error = %e, "Ignoring unparseable update");
                Outcome::Ignored(e.to_string())
            }
        }
    }

    /// Handle one parsed event end to end.
    pub async fn handle(&self, event: InboundEvent) -> Outcome {
        let key = event.dialog_key();
        let is_private = event.is_private();
        let requester = event.sender.as_ref().map(|s| Requester {
            user_id: s.id.to_string(),
            handle: s.handle.clone(),
        });
        let requester_id = requester.as_ref().map(|r| r.user_id.as_str());
        info!(
            dialog_key = %key,
            chat_id = event.chat_id,
            message_id = event.message_id,
            chat_kind = ?event.chat_kind,
            "Processing event"
        );

        // ── Profile names ──
        if let Some(sender) = &event.sender {
            let update = ProfileUpdate::names(sender.display_name(), sender.handle.clone());
            let user_id = sender.id.to_string();
            if let Err(e) = store_call(self.store_timeout, self.store.update_profile(&user_id, &update)).await {
                warn!(user_id, error = %e, "Ensuring profile failed");
            }
        }

        // ── Persist the incoming turn ──
        if !event.text.trim().is_empty() {
            let turn = Turn::user(
                key.clone(),
                &event.text,
                requester_id.map(str::to_string),
                event.sender.as_ref().and_then(|s| s.handle.clone()),
                self.retention,
            );
            if let Err(e) = store_call(self.store_timeout, self.store.append_turn(&turn)).await {
                warn!(dialog_key = %key, error = %e, "Saving incoming turn failed");
            }
        } else {
            debug!(dialog_key = %key, "Empty text, incoming turn not saved");
        }

        // ── Settings ──
        let initial = DialogSettings::initial(key.clone(), event.chat_kind, self.default_scope);
        let settings = match store_call(self.store_timeout, self.store.settings_or_insert(initial.clone())).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(dialog_key = %key, error = %e, "Loading settings failed, using defaults");
                initial.clone()
            }
        };

        // ── In-band commands ──
        if let Some(command) = Command::parse(&event.text, self.bot.handle.as_deref(), is_private) {
            self.apply_command(command, initial, &event).await;
            return Outcome::Command(command);
        }

        // ── Gate ──
        let mentioned = is_mentioned(&event.text, &event.entities, &self.bot, event.reply_to.as_ref());
        if !should_respond(settings.mode, is_private, mentioned) {
            info!(dialog_key = %key, mode = %settings.mode, mentioned, "Not responding");
            return Outcome::Skipped;
        }

        let target = event.reply_target();
        match tokio::time::timeout(self.transport_timeout, self.channel.send_typing(&target)).await {
            Ok(Err(e)) => debug!(error = %e, "Typing indicator failed"),
            Err(_) => debug!("Typing indicator timed out"),
            Ok(Ok(())) => {}
        }

        // ── Assemble ──
        let history = store_call(self.store_timeout, self.store.recent_turns(&key, self.history_limit))
            .await
            .unwrap_or_else(|e| {
                warn!(dialog_key = %key, error = %e, "History fetch failed");
                Vec::new()
            });
        let summary = store_call(self.store_timeout, self.store.latest_summary(&key))
            .await
            .unwrap_or_else(|e| {
                warn!(dialog_key = %key, error = %e, "Summary fetch failed");
                None
            });

        let mut profiles = ProfileCache::new();
        if is_private {
            if let Some(id) = requester_id {
                profiles.load(self.store.as_ref(), id, self.store_timeout).await;
            }
        } else {
            for author in authors(&history) {
                profiles.load(self.store.as_ref(), author, self.store_timeout).await;
            }
        }

        let assembled = self.assembler.assemble(&AssemblyInput {
            is_private,
            scope: settings.scope,
            requester: requester.as_ref(),
            now: Utc::now(),
            history: &history,
            summary: summary.as_ref().map(|s| s.text.as_str()),
            profiles: &profiles,
        });
        drop(profiles);

        // ── Fit to budget ──
        let policy = EvictionPolicy::for_dialog(settings.scope, is_private, requester_id);
        let fitted = self.evictor.fit(assembled, &policy, self.model.as_ref()).await;
        if let Some(text) = &fitted.summary {
            let summary = RollingSummary::new(key.clone(), text.clone(), self.retention);
            if let Err(e) = store_call(self.store_timeout, self.store.append_summary(&summary)).await {
                warn!(dialog_key = %key, error = %e, "Saving eviction summary failed");
            }
        }

        // ── Inference ──
        let preamble = fitted.context.preamble.render();
        let messages: Vec<Message> = fitted.context.turns.iter().map(|t| t.to_message()).collect();
        info!(
            dialog_key = %key,
            turns = messages.len(),
            tokens = self.evictor.estimate(&preamble, &fitted.context.turns),
            evicted = fitted.evicted,
            "Context ready"
        );
        let mut reply = self.model.respond(&preamble, &messages, &self.tools).await;
        if is_unusable(&reply) {
            warn!(dialog_key = %key, reply = %reply, "Unusable model reply, sending fallback");
            reply = self.fallback_notice.clone();
        }

        // ── Persist and deliver ──
        let turn = Turn::assistant(key.clone(), &reply, self.retention);
        if let Err(e) = store_call(self.store_timeout, self.store.append_turn(&turn)).await {
            warn!(dialog_key = %key, error = %e, "Saving reply failed");
        }

        let chunks = match tokio::time::timeout(self.transport_timeout, self.channel.send(&target, &reply)).await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                warn!(dialog_key = %key, error = %e, "Delivering reply failed");
                0
            }
            Err(_) => {
                warn!(dialog_key = %key, "Delivering reply timed out");
                0
            }
        };

        if let Some(id) = requester_id {
            let bump = ProfileUpdate::message_authored();
            if let Err(e) = store_call(self.store_timeout, self.store.update_profile(id, &bump)).await {
                warn!(user_id = id, error = %e, "Incrementing message count failed");
            }
        }

        // ── Maintenance ──
        let report = self.maintainer.run(&key, is_private, requester_id).await;
        debug!(dialog_key = %key, ?report, "Maintenance done");

        Outcome::Replied {
            chunks,
            evicted: fitted.evicted,
        }
    }

    async fn apply_command(&self, command: Command, initial: DialogSettings, event: &InboundEvent) {
        let key = initial.dialog_key.clone();
        let write = match command {
            Command::SetMode(mode) => store_call(self.store_timeout, self.store.set_mode(initial, mode)).await,
            Command::SetScope(scope) => store_call(self.store_timeout, self.store.set_scope(initial, scope)).await,
        };
        match write {
            Ok(settings) => info!(
                dialog_key = %key,
                mode = %settings.mode,
                scope = %settings.scope,
                "Settings updated"
            ),
            Err(e) => warn!(dialog_key = %key, %command, error = %e, "Updating settings failed"),
        }

        let target = event.reply_target();
        let confirm = tokio::time::timeout(
            self.transport_timeout,
            self.channel.send(&target, &command.confirmation()),
        )
        .await;
        match confirm {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(dialog_key = %key, error = %e, "Sending confirmation failed"),
            Err(_) => warn!(dialog_key = %key, "Sending confirmation timed out"),
        }
    }
}
