//! Prompt construction under a token budget.
//!
//! | Step | Module |
//! |------|--------|
//! | Count tokens | [`token`] |
//! | Pick the history window | [`selector`] |
//! | Add retrieved context, order the turns | [`assembler`] |

pub mod assembler;
pub mod selector;
pub mod token;

pub use assembler::{AssembledPrompt, PromptAssembler, format_context_block, with_context};
pub use selector::{Budget, Selection, TokenBudgetSelector};
pub use token::{HeuristicCounter, TiktokenCounter, counter_for};
