//! Prompt assembly.
//!
//! Combines the conversation, retrieved documents and the token budget into
//! the ordered turn list sent to the model:
//!
//! 1. Retrieved documents are rendered into one context block, in retrieval
//!    order, and prepended to the newest query.
//! 2. Turn selection is delegated to [`TokenBudgetSelector`], charging the
//!    rewritten query.
//! 3. The first turn is sent with the `System` sender.
//!
//! Assembly is pure: identical inputs always give identical output.

use std::sync::Arc;

use ragchat_core::message::{Conversation, Sender, Turn};
use ragchat_core::retrieval::RetrievedDocument;
use ragchat_core::token::TokenCounter;

use super::selector::{Budget, TokenBudgetSelector};

// ── Types ─────────────────────────────────────────────────────────────────

/// The final turn sequence for one model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    /// System turn, selected history window, newest (possibly augmented) query
    pub turns: Vec<Turn>,
    pub used_tokens: usize,
    pub dropped_turns: usize,
    pub context_documents: usize,
    /// Mandatory turns alone exceeded the budget
    pub over_budget: bool,
}

/// Render documents as `From file {id}:\n{content}` blocks separated by a
/// blank line. Empty input gives an empty string.
pub fn format_context_block(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .map(|d| format!("From file {}:\n{}", d.source_id, d.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prefix `query` with a non-empty context block.
pub fn with_context(block: &str, query: &str) -> String {
    if block.is_empty() {
        query.to_string()
    } else {
        format!("Relevant context: {block}\n\n{query}")
    }
}

// ── Assembler ─────────────────────────────────────────────────────────────

pub struct PromptAssembler {
    counter: Arc<dyn TokenCounter>,
    budget: Budget,
}

impl PromptAssembler {
    pub fn new(counter: Arc<dyn TokenCounter>, budget: Budget) -> Self {
        Self { counter, budget }
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn assemble(
        &self,
        conversation: &Conversation,
        documents: &[RetrievedDocument],
    ) -> AssembledPrompt {
        let latest = conversation.latest();
        let block = format_context_block(documents);
        let latest = latest.with_text(with_context(&block, &latest.text));

        let selection = TokenBudgetSelector::new(self.counter.as_ref(), self.budget)
            .select_with_latest(conversation, &latest);

        let mut turns = selection.turns;
        if turns.len() > 1 && turns[0].sender != Sender::System {
            turns[0] = turns[0].with_sender(Sender::System);
        }

        AssembledPrompt {
            turns,
            used_tokens: selection.used_tokens,
            dropped_turns: selection.dropped,
            context_documents: documents.len(),
            over_budget: selection.over_budget,
        }
    }
}
