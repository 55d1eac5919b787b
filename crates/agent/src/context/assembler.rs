//! Context assembly: the preamble plus a speaker-annotated turn sequence.
//!
//! The preamble is built from these sections, in order:
//!
//! | Section | Present when |
//! |---------|--------------|
//! | Date and time | always (the model has no clock) |
//! | Base instructions | non-empty |
//! | Dialog summary | a rolling summary exists |
//! | Profile digest | private chat, the requester has learned memory |
//! | Participant roster | group chat with known authors |
//! | Scope instructions | group chat |
//!
//! Assembly is pure. Store lookups happen beforehand, and profiles arrive
//! through a [`ProfileCache`] scoped to the event being processed.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use parley_config::EngineConfig;
use parley_core::dialog::Scope;
use parley_core::message::Message;
use parley_core::store::{Store, Turn, TurnRole, UserProfile};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

// ── Types ─────────────────────────────────────────────────────────────────

/// One turn of the candidate sequence, content already annotated.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextTurn {
    pub role: TurnRole,
    pub content: String,
    /// Author of a user turn, when known
    pub speaker_id: Option<String>,
}

impl ContextTurn {
    pub fn user(content: impl Into<String>, speaker_id: Option<&str>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            speaker_id: speaker_id.map(str::to_string),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            speaker_id: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == TurnRole::User
    }

    /// A user turn whose known author is someone other than `requester`.
    pub fn is_from_other(&self, requester: Option<&str>) -> bool {
        self.is_user()
            && self
                .speaker_id
                .as_deref()
                .is_some_and(|speaker| Some(speaker) != requester)
    }

    pub fn to_message(&self) -> Message {
        match self.role {
            TurnRole::User => Message::user(&self.content),
            TurnRole::Assistant => Message::assistant(&self.content),
        }
    }
}

/// System preamble sections, joined with blank lines when rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preamble {
    sections: Vec<String>,
}

impl Preamble {
    pub fn push(&mut self, section: impl Into<String>) {
        let section = section.into();
        if !section.trim().is_empty() {
            self.sections.push(section);
        }
    }

    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    pub fn render(&self) -> String {
        self.sections.join("\n\n")
    }
}

/// The person whose message is being answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Requester {
    pub user_id: String,
    pub handle: Option<String>,
}

/// Request-scoped profile lookups, keyed by user id.
///
/// Misses and failures are cached too, so each id hits the store at most
/// once per event. Drop the cache when the event is done.
#[derive(Debug, Default)]
pub struct ProfileCache {
    entries: HashMap<String, Option<UserProfile>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch `user_id` into the cache unless it is already there.
    pub async fn load(&mut self, store: &dyn Store, user_id: &str, timeout: Duration) {
        if self.entries.contains_key(user_id) {
            return;
        }
        let profile = match tokio::time::timeout(timeout, store.get_profile(user_id)).await {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                warn!(user_id, error = %e, "Profile lookup failed");
                None
            }
            Err(_) => {
                warn!(user_id, timeout_secs = timeout.as_secs(), "Profile lookup timed out");
                None
            }
        };
        self.entries.insert(user_id.to_string(), profile);
    }

    pub fn insert(&mut self, profile: UserProfile) {
        self.entries.insert(profile.user_id.clone(), Some(profile));
    }

    pub fn get(&self, user_id: &str) -> Option<&UserProfile> {
        self.entries.get(user_id).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything assembly needs for one event.
pub struct AssemblyInput<'a> {
    pub is_private: bool,
    pub scope: Scope,
    pub requester: Option<&'a Requester>,
    pub now: DateTime<Utc>,
    /// Persisted turns, oldest first
    pub history: &'a [Turn],
    pub summary: Option<&'a str>,
    pub profiles: &'a ProfileCache,
}

/// The assembled context, ready for budget fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub preamble: Preamble,
    pub turns: Vec<ContextTurn>,
}

/// Distinct user-turn authors in order of first appearance.
pub fn authors(history: &[Turn]) -> Vec<&str> {
    let mut seen = Vec::new();
    for turn in history {
        if turn.role != TurnRole::User {
            continue;
        }
        if let Some(id) = turn.speaker_id.as_deref() {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
    }
    seen
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// Builds the preamble and turn sequence. Stateless, create once and reuse.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    base_prompt: String,
    clock: FixedOffset,
    clock_label: String,
}

impl ContextAssembler {
    pub fn new(base_prompt: impl Into<String>, utc_offset_hours: i32, label: impl Into<String>) -> Self {
        let clock = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                warn!(utc_offset_hours, "Invalid timezone offset, using UTC");
                Utc.fix()
            });
        Self {
            base_prompt: base_prompt.into(),
            clock,
            clock_label: label.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.base_system_prompt.clone(),
            config.timezone_offset_hours,
            config.timezone_label.clone(),
        )
    }

    pub fn assemble(&self, input: &AssemblyInput<'_>) -> AssembledContext {
        let requester_id = input.requester.map(|r| r.user_id.as_str());
        let mut preamble = Preamble::default();

        let local = input.now.with_timezone(&self.clock);
        preamble.push(format!(
            "Current date and time: {} ({})",
            local.format("%d.%m.%Y %H:%M"),
            self.clock_label
        ));
        preamble.push(self.base_prompt.clone());

        if let Some(summary) = input.summary.filter(|s| !s.trim().is_empty()) {
            preamble.push(format!("Dialog summary: {summary}"));
        }

        if input.is_private {
            if let Some(requester) = input.requester {
                if let Some(digest) = profile_digest(requester, input.profiles.get(&requester.user_id)) {
                    preamble.push(digest);
                }
            }
        } else {
            if let Some(roster) = roster(input.history, input.profiles, requester_id) {
                preamble.push(roster);
            }
            preamble.push(scope_instructions(input.scope, requester_id));
        }

        let initiator_only = !input.is_private && input.scope == Scope::Initiator;
        let mut turns = Vec::with_capacity(input.history.len());
        for turn in input.history {
            let candidate = match turn.role {
                TurnRole::Assistant => ContextTurn::assistant(&turn.content),
                TurnRole::User => {
                    let content = match turn.speaker_id.as_deref() {
                        Some(id) => format!("{} {}", speaker_tag(turn, id, input.profiles), turn.content),
                        None => turn.content.clone(),
                    };
                    ContextTurn::user(content, turn.speaker_id.as_deref())
                }
            };
            if initiator_only && candidate.is_from_other(requester_id) {
                continue;
            }
            turns.push(candidate);
        }

        debug!(
            history = input.history.len(),
            turns = turns.len(),
            sections = preamble.sections().len(),
            "Context assembled"
        );

        AssembledContext { preamble, turns }
    }
}

// ── Sections ──────────────────────────────────────────────────────────────

fn speaker_name(user_id: &str, handle: Option<&str>, profile: Option<&UserProfile>) -> String {
    profile
        .and_then(|p| p.display_name.as_deref())
        .filter(|n| !n.trim().is_empty())
        .or(handle)
        .unwrap_or(user_id)
        .to_string()
}

fn speaker_handle<'a>(turn_handle: Option<&'a str>, profile: Option<&'a UserProfile>) -> Option<&'a str> {
    turn_handle
        .or_else(|| profile.and_then(|p| p.handle.as_deref()))
        .filter(|h| !h.is_empty())
}

/// `[Name (@handle), ID:123]`
fn speaker_tag(turn: &Turn, user_id: &str, profiles: &ProfileCache) -> String {
    let profile = profiles.get(user_id);
    let handle = speaker_handle(turn.speaker_handle.as_deref(), profile);
    let name = speaker_name(user_id, handle, profile);
    match handle {
        Some(handle) if handle != name => format!("[{name} (@{handle}), ID:{user_id}]"),
        _ => format!("[{name}, ID:{user_id}]"),
    }
}

fn profile_digest(requester: &Requester, profile: Option<&UserProfile>) -> Option<String> {
    let profile = profile.filter(|p| p.has_memory())?;

    let mut header = String::from("About the user");
    if let Some(name) = profile.display_name.as_deref().filter(|n| !n.is_empty()) {
        header.push_str(&format!(" ({name})"));
    }
    if let Some(handle) = speaker_handle(requester.handle.as_deref(), Some(profile)) {
        header.push_str(&format!(" @{handle}"));
    }
    header.push(':');

    let mut lines = vec![header];
    let style = profile.communication_style.trim();
    if !style.is_empty() {
        lines.push(format!("- Communication style: {style}"));
    }
    if !profile.interests.is_empty() {
        lines.push(format!("- Interests: {}", profile.interests.join(", ")));
    }
    let long_term = profile.long_term_summary.trim();
    if !long_term.is_empty() {
        lines.push(format!("- Context from earlier conversations: {long_term}"));
    }
    if !profile.last_topics.is_empty() {
        lines.push(format!("- Recent topics: {}", profile.last_topics.join(", ")));
    }
    lines.push(String::new());
    lines.push("Personalize the answer using this context and the user's style.".into());
    Some(lines.join("\n"))
}

fn roster(history: &[Turn], profiles: &ProfileCache, requester: Option<&str>) -> Option<String> {
    let ids = authors(history);
    if ids.is_empty() {
        return None;
    }

    let mut lines = vec!["Participants:".to_string()];
    for id in ids {
        let profile = profiles.get(id);
        let turn_handle = history
            .iter()
            .find(|t| t.speaker_id.as_deref() == Some(id))
            .and_then(|t| t.speaker_handle.as_deref());
        let handle = speaker_handle(turn_handle, profile);
        let name = speaker_name(id, handle, profile);

        let mut line = format!("- {name}");
        if let Some(handle) = handle {
            line.push_str(&format!(" (@{handle})"));
        }
        line.push_str(&format!(", ID:{id}, "));
        line.push_str(if Some(id) == requester {
            "current requester"
        } else {
            "participant"
        });
        lines.push(line);
    }
    Some(lines.join("\n"))
}

fn scope_instructions(scope: Scope, requester: Option<&str>) -> String {
    let who = requester.unwrap_or("unknown");
    match scope {
        Scope::Initiator => format!(
            "Current requester: ID={who}\n\
             Use only the messages from the current requester (marked with their prefix) as input.\n\
             Ignore other participants' messages unless the requester explicitly refers to them."
        ),
        Scope::Thread => format!(
            "Group dialog (topic or thread). Current requester: ID={who}.\n\
             Take every participant's messages into account and tell speakers apart by name and prefix. \
             Answer the requester."
        ),
        Scope::Hybrid => format!(
            "Hybrid mode: prioritize the current requester's messages (ID={who}) but keep the other \
             participants' context in mind.\n\
             Tell speakers apart by name and prefix. Answer the requester."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use parley_core::dialog::DialogKey;

    fn key() -> DialogKey {
        DialogKey::from("-100:7")
    }

    fn user_turn(id: &str, handle: Option<&str>, text: &str) -> Turn {
        Turn::user(
            key(),
            text,
            Some(id.to_string()),
            handle.map(str::to_string),
            ChronoDuration::days(1),
        )
    }

    fn bot_turn(text: &str) -> Turn {
        Turn::assistant(key(), text, ChronoDuration::days(1))
    }

    fn profile(id: &str, name: Option<&str>) -> UserProfile {
        let mut p = UserProfile::new(id);
        p.display_name = name.map(str::to_string);
        p
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 21, 5, 0).unwrap()
    }

    fn assembler() -> ContextAssembler {
        ContextAssembler::new("You are a helpful assistant.", 3, "MSK")
    }

    fn input<'a>(
        is_private: bool,
        scope: Scope,
        requester: &'a Requester,
        history: &'a [Turn],
        profiles: &'a ProfileCache,
    ) -> AssemblyInput<'a> {
        AssemblyInput {
            is_private,
            scope,
            requester: Some(requester),
            now: fixed_now(),
            history,
            summary: None,
            profiles,
        }
    }

    fn requester(id: &str) -> Requester {
        Requester {
            user_id: id.into(),
            handle: None,
        }
    }

    #[test]
    fn preamble_starts_with_local_clock() {
        let req = requester("1");
        let profiles = ProfileCache::new();
        let ctx = assembler().assemble(&input(true, Scope::Hybrid, &req, &[], &profiles));
        assert_eq!(
            ctx.preamble.sections()[0],
            "Current date and time: 10.03.2024 00:05 (MSK)"
        );
        assert_eq!(ctx.preamble.sections()[1], "You are a helpful assistant.");
        assert_eq!(ctx.preamble.sections().len(), 2);
    }

    #[test]
    fn summary_follows_base_prompt() {
        let req = requester("1");
        let profiles = ProfileCache::new();
        let mut inp = input(true, Scope::Hybrid, &req, &[], &profiles);
        inp.summary = Some("They talked about Rust.");
        let ctx = assembler().assemble(&inp);
        assert_eq!(ctx.preamble.sections()[2], "Dialog summary: They talked about Rust.");
    }

    #[test]
    fn speaker_tags_fall_back_name_handle_id() {
        let history = vec![
            user_turn("1", Some("ann"), "hi"),
            user_turn("2", Some("bob"), "yo"),
            user_turn("3", None, "hey"),
            bot_turn("hello all"),
        ];
        let mut profiles = ProfileCache::new();
        profiles.insert(profile("1", Some("Ann")));
        let req = requester("1");
        let ctx = assembler().assemble(&input(false, Scope::Thread, &req, &history, &profiles));

        let contents: Vec<&str> = ctx.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "[Ann (@ann), ID:1] hi",
                "[bob, ID:2] yo",
                "[3, ID:3] hey",
                "hello all",
            ]
        );
    }

    #[test]
    fn handle_equal_to_name_is_not_repeated() {
        let history = vec![user_turn("5", Some("zed"), "hi")];
        let mut profiles = ProfileCache::new();
        profiles.insert(profile("5", Some("zed")));
        let req = requester("5");
        let ctx = assembler().assemble(&input(false, Scope::Thread, &req, &history, &profiles));
        assert_eq!(ctx.turns[0].content, "[zed, ID:5] hi");
    }

    #[test]
    fn group_preamble_has_roster_then_scope() {
        let history = vec![
            user_turn("1", Some("ann"), "hi"),
            user_turn("2", None, "yo"),
            user_turn("1", Some("ann"), "again"),
        ];
        let mut profiles = ProfileCache::new();
        profiles.insert(profile("1", Some("Ann")));
        let req = requester("1");
        let ctx = assembler().assemble(&input(false, Scope::Hybrid, &req, &history, &profiles));

        let sections = ctx.preamble.sections();
        assert_eq!(
            sections[2],
            "Participants:\n- Ann (@ann), ID:1, current requester\n- 2, ID:2, participant"
        );
        assert!(sections[3].starts_with("Hybrid mode"));
        assert!(sections[3].contains("ID=1"));
    }

    #[test]
    fn scope_wording_varies() {
        let req = requester("9");
        let profiles = ProfileCache::new();
        let initiator = assembler().assemble(&input(false, Scope::Initiator, &req, &[], &profiles));
        let thread = assembler().assemble(&input(false, Scope::Thread, &req, &[], &profiles));
        assert!(initiator.preamble.render().contains("Use only the messages from the current requester"));
        assert!(thread.preamble.render().contains("Group dialog (topic or thread)"));
    }

    #[test]
    fn initiator_scope_drops_other_authors() {
        let history = vec![
            user_turn("1", None, "mine"),
            user_turn("2", None, "theirs"),
            bot_turn("answer"),
            user_turn("3", None, "also theirs"),
            user_turn("1", None, "mine again"),
        ];
        let profiles = ProfileCache::new();
        let req = requester("1");
        let ctx = assembler().assemble(&input(false, Scope::Initiator, &req, &history, &profiles));

        assert_eq!(ctx.turns.len(), 3);
        assert!(ctx.turns.iter().all(|t| !t.is_from_other(Some("1"))));
        assert_eq!(ctx.turns[1].role, TurnRole::Assistant);
    }

    #[test]
    fn private_chats_ignore_initiator_filter() {
        let history = vec![user_turn("1", None, "a"), user_turn("2", None, "b")];
        let profiles = ProfileCache::new();
        let req = requester("1");
        let ctx = assembler().assemble(&input(true, Scope::Initiator, &req, &history, &profiles));
        assert_eq!(ctx.turns.len(), 2);
    }

    #[test]
    fn profile_digest_only_with_memory() {
        let req = Requester {
            user_id: "1".into(),
            handle: Some("ann".into()),
        };
        let mut profiles = ProfileCache::new();
        profiles.insert(profile("1", Some("Ann")));
        let bare = assembler().assemble(&input(true, Scope::Hybrid, &req, &[], &profiles));
        assert_eq!(bare.preamble.sections().len(), 2);

        let mut learned = profile("1", Some("Ann"));
        learned.interests = vec!["rust".into(), "chess".into()];
        learned.long_term_summary = "Works on a compiler.".into();
        profiles.insert(learned);
        let ctx = assembler().assemble(&input(true, Scope::Hybrid, &req, &[], &profiles));
        let digest = &ctx.preamble.sections()[2];
        assert!(digest.starts_with("About the user (Ann) @ann:"));
        assert!(digest.contains("- Interests: rust, chess"));
        assert!(digest.contains("- Context from earlier conversations: Works on a compiler."));
        assert!(!digest.contains("Communication style"));
    }

    #[test]
    fn authors_in_first_appearance_order() {
        let history = vec![
            user_turn("2", None, "a"),
            bot_turn("b"),
            user_turn("1", None, "c"),
            user_turn("2", None, "d"),
        ];
        assert_eq!(authors(&history), vec!["2", "1"]);
    }

    #[tokio::test]
    async fn profile_cache_hits_store_once() {
        use parley_core::store::ProfileUpdate;
        use parley_memory::InMemoryStore;

        let store = InMemoryStore::new();
        store
            .update_profile("1", &ProfileUpdate::names(Some("Ann".into()), None))
            .await
            .unwrap();

        let mut cache = ProfileCache::new();
        cache.load(&store, "1", Duration::from_secs(1)).await;
        cache.load(&store, "404", Duration::from_secs(1)).await;
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("1").and_then(|p| p.display_name.as_deref()), Some("Ann"));
        assert!(cache.get("404").is_none());
    }
}
