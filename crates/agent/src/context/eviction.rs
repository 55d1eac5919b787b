//! Budget eviction: trim the assembled context until its estimate fits.
//!
//! The policy runs one step at a time until the context fits or a single
//! turn is left:
//!
//! 1. Hybrid scope in a group: drop the oldest user turn written by someone
//!    other than the requester.
//! 2. Otherwise drop the oldest user/assistant pair as a unit, or the single
//!    oldest turn when the head is not a pair.
//!
//! Evicted turns can be folded into a rolling summary that is appended to
//! the preamble for this response.

use crate::context::assembler::{AssembledContext, ContextTurn};
use crate::context::token::TokenEstimator;
use async_trait::async_trait;
use parley_core::dialog::Scope;
use parley_core::store::TurnRole;
use tracing::{debug, info};

/// Condenses evicted turns into a summary. `None` means "no summary".
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize_evicted(&self, turns: &[ContextTurn]) -> Option<String>;
}

/// Which turns to give up first.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionPolicy {
    /// Evict other authors' user turns before anything else
    pub prefer_others: bool,
    pub requester: Option<String>,
}

impl EvictionPolicy {
    pub fn for_dialog(scope: Scope, is_private: bool, requester: Option<&str>) -> Self {
        Self {
            prefer_others: !is_private && scope == Scope::Hybrid,
            requester: requester.map(str::to_string),
        }
    }

    /// Strict chronological eviction.
    pub fn chronological() -> Self {
        Self {
            prefer_others: false,
            requester: None,
        }
    }
}

/// Result of fitting a context to the budget.
#[derive(Debug, Clone)]
pub struct Fitted {
    pub context: AssembledContext,
    /// Number of turns removed
    pub evicted: usize,
    /// Summary of the evicted turns, when one was produced
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct BudgetEvictor {
    estimator: TokenEstimator,
    budget: usize,
    summary_batch: usize,
}

impl BudgetEvictor {
    pub fn new(estimator: TokenEstimator, budget: usize) -> Self {
        Self {
            estimator,
            budget,
            summary_batch: 16,
        }
    }

    /// Cap on evicted turns sent for summarization (the most recent ones).
    pub fn with_summary_batch(mut self, batch: usize) -> Self {
        self.summary_batch = batch;
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn estimate(&self, preamble: &str, turns: &[ContextTurn]) -> usize {
        self.estimator
            .request(preamble, turns.iter().map(|t| t.content.as_str()))
    }

    /// Evict from `turns` until the estimate fits. Returns the evicted turns
    /// in eviction order. Never removes the last remaining turn.
    pub fn evict(
        &self,
        turns: &mut Vec<ContextTurn>,
        preamble: &str,
        policy: &EvictionPolicy,
    ) -> Vec<ContextTurn> {
        let mut evicted = Vec::new();
        let mut size = self.estimate(preamble, turns);

        while size > self.budget && turns.len() > 1 {
            let (start, count) = next_victim(turns, policy);
            evicted.extend(turns.drain(start..start + count));
            let next = self.estimate(preamble, turns);
            debug_assert!(next <= size);
            size = next;
        }

        if !evicted.is_empty() {
            debug!(
                evicted = evicted.len(),
                remaining = turns.len(),
                size,
                budget = self.budget,
                "Evicted turns"
            );
        }
        evicted
    }

    /// Fit `context` to the budget, summarizing what was evicted.
    ///
    /// If the summary note itself pushes the context over budget, eviction
    /// runs again; those turns are dropped without a second summary.
    pub async fn fit(
        &self,
        mut context: AssembledContext,
        policy: &EvictionPolicy,
        summarizer: &dyn Summarizer,
    ) -> Fitted {
        let evicted = self.evict(&mut context.turns, &context.preamble.render(), policy);
        if evicted.is_empty() {
            return Fitted {
                context,
                evicted: 0,
                summary: None,
            };
        }

        let batch_start = evicted.len().saturating_sub(self.summary_batch);
        let summary = summarizer
            .summarize_evicted(&evicted[batch_start..])
            .await
            .filter(|s| !s.trim().is_empty());

        let mut total = evicted.len();
        if let Some(text) = &summary {
            context.preamble.push(format!("Earlier dialog summary: {text}"));
            total += self
                .evict(&mut context.turns, &context.preamble.render(), policy)
                .len();
        }

        info!(
            evicted = total,
            remaining = context.turns.len(),
            summarized = summary.is_some(),
            "Context fitted to budget"
        );

        Fitted {
            context,
            evicted: total,
            summary,
        }
    }
}

/// Start index and length of the next eviction.
fn next_victim(turns: &[ContextTurn], policy: &EvictionPolicy) -> (usize, usize) {
    if policy.prefer_others {
        if let Some(i) = turns
            .iter()
            .position(|t| t.is_from_other(policy.requester.as_deref()))
        {
            return (i, 1);
        }
    }

    let head_is_pair = turns.len() > 2
        && turns[0].role == TurnRole::User
        && turns[1].role == TurnRole::Assistant;
    (0, if head_is_pair { 2 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::assembler::Preamble;
    use std::sync::Mutex;

    struct FixedSummary(Option<&'static str>, Mutex<Vec<usize>>);

    impl FixedSummary {
        fn new(text: Option<&'static str>) -> Self {
            Self(text, Mutex::new(Vec::new()))
        }

        fn calls(&self) -> Vec<usize> {
            self.1.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Summarizer for FixedSummary {
        async fn summarize_evicted(&self, turns: &[ContextTurn]) -> Option<String> {
            self.1.lock().unwrap().push(turns.len());
            self.0.map(str::to_string)
        }
    }

    fn evictor(budget: usize) -> BudgetEvictor {
        BudgetEvictor::new(TokenEstimator::new(4, 4, 6), budget)
    }

    fn user(id: &str, text: &str) -> ContextTurn {
        ContextTurn::user(text, Some(id))
    }

    fn bot(text: &str) -> ContextTurn {
        ContextTurn::assistant(text)
    }

    fn context(turns: Vec<ContextTurn>) -> AssembledContext {
        let mut preamble = Preamble::default();
        preamble.push("Be brief.");
        AssembledContext { preamble, turns }
    }

    #[test]
    fn fits_without_eviction() {
        let mut turns = vec![user("1", "hi"), bot("hello")];
        let evicted = evictor(1000).evict(&mut turns, "", &EvictionPolicy::chronological());
        assert!(evicted.is_empty());
        assert_eq!(turns.len(), 2);
    }

    #[test]
    fn never_evicts_last_turn() {
        let mut turns = vec![user("1", &"x".repeat(400)), bot(&"y".repeat(400))];
        let evicted = evictor(10).evict(&mut turns, "", &EvictionPolicy::chronological());
        assert_eq!(turns.len(), 1);
        assert_eq!(evicted.len(), 1);
        assert_eq!(turns[0].role, TurnRole::Assistant);
    }

    #[test]
    fn single_turn_over_budget_is_kept() {
        let mut turns = vec![user("1", &"x".repeat(4000))];
        let evicted = evictor(10).evict(&mut turns, "", &EvictionPolicy::chronological());
        assert!(evicted.is_empty());
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn evicts_leading_pair_as_unit() {
        let mut turns = vec![
            user("1", &"a".repeat(40)),
            bot(&"b".repeat(40)),
            user("1", "c"),
            bot("d"),
            user("1", "e"),
        ];
        // full: 6 + 14 + 14 + 5 + 5 + 5 = 49; without head pair: 21
        let evicted = evictor(30).evict(&mut turns, "", &EvictionPolicy::chronological());
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].role, TurnRole::User);
        assert_eq!(evicted[1].role, TurnRole::Assistant);
        assert_eq!(turns.len(), 3);
    }

    #[test]
    fn assistant_head_is_evicted_alone() {
        let mut turns = vec![bot(&"a".repeat(40)), user("1", "b"), bot("c")];
        // 6 + 14 + 5 + 5 = 30; without head: 16
        let evicted = evictor(20).evict(&mut turns, "", &EvictionPolicy::chronological());
        assert_eq!(evicted.len(), 1);
        assert_eq!(turns.len(), 2);
    }

    #[test]
    fn hybrid_evicts_other_authors_first() {
        let mut turns = vec![
            user("1", &"mine".repeat(10)),
            bot(&"reply".repeat(8)),
            user("2", &"theirs".repeat(10)),
            user("3", &"also".repeat(10)),
            user("1", "now"),
        ];
        let policy = EvictionPolicy::for_dialog(Scope::Hybrid, false, Some("1"));
        let budget = evictor(0).estimate("", &turns) - 1;
        let evicted = evictor(budget).evict(&mut turns, "", &policy);

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].speaker_id.as_deref(), Some("2"));
        assert_eq!(turns[0].speaker_id.as_deref(), Some("1"));
    }

    #[test]
    fn hybrid_falls_back_to_chronological() {
        let mut turns = vec![user("1", "a"), bot("b"), user("1", "c"), bot("d"), user("1", "e")];
        let policy = EvictionPolicy::for_dialog(Scope::Hybrid, false, Some("1"));
        let evicted = evictor(0).evict(&mut turns, "", &policy);
        assert_eq!(evicted.len(), 4);
        assert_eq!(turns, vec![user("1", "e")]);
    }

    #[test]
    fn private_hybrid_does_not_prefer_others() {
        let policy = EvictionPolicy::for_dialog(Scope::Hybrid, true, Some("1"));
        assert!(!policy.prefer_others);
        let thread = EvictionPolicy::for_dialog(Scope::Thread, false, Some("1"));
        assert!(!thread.prefer_others);
    }

    #[test]
    fn size_decreases_each_step() {
        let est = evictor(0);
        let policy = EvictionPolicy::for_dialog(Scope::Hybrid, false, Some("1"));
        let mut turns: Vec<ContextTurn> = (0..30)
            .map(|i| match i % 3 {
                0 => user("1", &format!("question {i}")),
                1 => bot(&format!("answer {i}")),
                _ => user("2", &format!("aside {i}")),
            })
            .collect();
        let mut last = est.estimate("", &turns);
        while turns.len() > 1 {
            let (start, count) = next_victim(&turns, &policy);
            turns.drain(start..start + count);
            let now = est.estimate("", &turns);
            assert!(now < last);
            last = now;
        }
    }

    #[tokio::test]
    async fn fit_appends_summary_note() {
        let turns = (0..20)
            .map(|i| if i % 2 == 0 { user("1", &"q".repeat(80)) } else { bot(&"a".repeat(80)) })
            .collect();
        let summarizer = FixedSummary::new(Some("They discussed queues."));
        let ev = evictor(120).with_summary_batch(4);
        let fitted = ev
            .fit(context(turns), &EvictionPolicy::chronological(), &summarizer)
            .await;

        assert!(fitted.evicted > 0);
        assert_eq!(fitted.summary.as_deref(), Some("They discussed queues."));
        assert_eq!(
            fitted.context.preamble.sections().last().map(String::as_str),
            Some("Earlier dialog summary: They discussed queues.")
        );
        assert!(ev.estimate(&fitted.context.preamble.render(), &fitted.context.turns) <= 120);
        assert_eq!(summarizer.calls(), vec![4]);
    }

    #[tokio::test]
    async fn fit_survives_summary_failure() {
        let turns = vec![user("1", &"x".repeat(200)), bot("ok"), user("1", "next")];
        let summarizer = FixedSummary::new(None);
        let fitted = evictor(30)
            .fit(context(turns), &EvictionPolicy::chronological(), &summarizer)
            .await;

        assert_eq!(fitted.evicted, 2);
        assert!(fitted.summary.is_none());
        assert_eq!(fitted.context.preamble.sections().len(), 1);
        assert_eq!(fitted.context.turns, vec![user("1", "next")]);
    }

    #[tokio::test]
    async fn fit_skips_summarizer_when_nothing_evicted() {
        let summarizer = FixedSummary::new(Some("unused"));
        let fitted = evictor(1000)
            .fit(context(vec![user("1", "hi")]), &EvictionPolicy::chronological(), &summarizer)
            .await;
        assert_eq!(fitted.evicted, 0);
        assert!(summarizer.calls().is_empty());
    }
}
