//! The parley engine.
//!
//! For each inbound event the engine:
//!
//! 1. **Resolves** the dialog key and loads (or creates) the dialog settings
//! 2. **Short-circuits** on `/mode` and `/scope` commands
//! 3. **Gates** on mode and mention
//! 4. **Assembles** a preamble and speaker-annotated history
//! 5. **Fits** the context to the token budget, summarizing what it evicts
//! 6. **Replies** through the model, running tools as requested
//! 7. **Refreshes** the rolling summary and long-term profile when due

pub mod command;
pub mod context;
pub mod inference;
pub mod maintenance;
pub mod mention;
pub mod pipeline;

#[cfg(test)]
mod test_helpers;

pub use command::{Command, should_respond};
pub use context::{
    AssembledContext, BudgetEvictor, ContextAssembler, ContextTurn, EvictionPolicy, TokenEstimator,
};
pub use inference::{MODEL_FAILURE, ModelClient, is_unusable};
pub use maintenance::{MemoryMaintainer, Thresholds};
pub use mention::{BotIdentity, is_mentioned};
pub use pipeline::{MessageProcessor, Outcome};
