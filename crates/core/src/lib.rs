//! # parley core
//!
//! Domain types, collaborator traits, and error definitions for the parley
//! chat engine. Nothing here talks to the network or a database; the engine
//! in `parley-agent` is written against these traits and the other crates
//! implement them.
//!
//! ## Collaborators
//!
//! - [`Store`]: settings, turns, rolling summaries, user profiles
//! - [`Provider`]: the language-model service
//! - [`Channel`]: outbound delivery of reply text
//! - [`Tool`]: capabilities the model may invoke while answering

pub mod channel;
pub mod dialog;
pub mod error;
pub mod inbound;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use channel::{Channel, ChatTarget};
pub use dialog::{ChatKind, DialogKey, DialogSettings, Mode, Scope};
pub use error::{ChannelError, Error, ProviderError, Result, StoreError, ToolError};
pub use inbound::{EntityKind, InboundEvent, MessageEntity, ReplyContext, Sender};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use store::{ProfileUpdate, RollingSummary, Store, Turn, TurnRole, UserProfile};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
