//! Token estimation.
//!
//! A character-based heuristic: `ceil(chars / chars_per_token)` per text,
//! plus fixed per-message and per-request overheads. It matches no real
//! tokenizer; it only needs to be deterministic and monotonic in length,
//! since the eviction loop uses it to decide when to stop.

use parley_config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimator {
    chars_per_token: usize,
    message_overhead: usize,
    request_overhead: usize,
}

impl TokenEstimator {
    pub fn new(chars_per_token: usize, message_overhead: usize, request_overhead: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
            message_overhead,
            request_overhead,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.chars_per_token,
            config.message_overhead_tokens,
            config.request_overhead_tokens,
        )
    }

    /// Estimate a bare string. Rounds up.
    pub fn text(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    /// Estimate one message, including its overhead.
    pub fn message(&self, content: &str) -> usize {
        self.message_overhead + self.text(content)
    }

    /// Estimate a whole request: preamble, every message, request overhead.
    pub fn request<'a>(&self, preamble: &str, contents: impl IntoIterator<Item = &'a str>) -> usize {
        let messages: usize = contents.into_iter().map(|c| self.message(c)).sum();
        self.request_overhead + self.text(preamble) + messages
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(4, 4, 6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(TokenEstimator::default().text(""), 0);
    }

    #[test]
    fn rounds_up() {
        let est = TokenEstimator::default();
        assert_eq!(est.text("test"), 1);
        assert_eq!(est.text("hello"), 2);
        assert_eq!(est.text(&"a".repeat(100)), 25);
    }

    #[test]
    fn counts_chars_not_bytes() {
        // 4 Cyrillic letters are 8 bytes
        assert_eq!(TokenEstimator::default().text("тест"), 1);
    }

    #[test]
    fn message_includes_overhead() {
        assert_eq!(TokenEstimator::default().message("test"), 5);
    }

    #[test]
    fn request_adds_preamble_and_overhead() {
        let est = TokenEstimator::default();
        // 6 + ceil(8/4) + (4+2) + (4+2)
        assert_eq!(est.request("You are.", ["hello", "world"]), 20);
        assert_eq!(est.request("", std::iter::empty()), 6);
    }

    #[test]
    fn zero_divisor_is_clamped() {
        assert_eq!(TokenEstimator::new(0, 0, 0).text("abc"), 3);
    }

    #[test]
    fn monotonic_in_length() {
        let est = TokenEstimator::new(3, 2, 1);
        let mut last = 0;
        for n in 0..50 {
            let now = est.message(&"x".repeat(n));
            assert!(now >= last);
            last = now;
        }
    }
}
