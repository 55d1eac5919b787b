//! Language-model provider implementations for parley.
//!
//! All providers implement [`parley_core::Provider`].

pub mod anthropic;

pub use anthropic::AnthropicProvider;
