//! Context assembly and budget fitting.
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Assemble | [`assembler`] | preamble + annotated turns |
//! | Estimate | [`token`] | approximate token count |
//! | Evict | [`eviction`] | turns that fit the budget, plus an optional summary |

pub mod assembler;
pub mod eviction;
pub mod token;

pub use assembler::{
    AssembledContext, AssemblyInput, ContextAssembler, ContextTurn, Preamble, ProfileCache, Requester,
};
pub use eviction::{BudgetEvictor, EvictionPolicy, Fitted, Summarizer};
pub use token::TokenEstimator;
