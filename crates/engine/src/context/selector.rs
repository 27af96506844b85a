//! Token-budgeted turn selection.
//!
//! The first turn (system instruction) and the last turn (newest query) are
//! always sent. Middle turns are added newest-first until the next one would
//! push the running total past the budget; that turn and everything older is
//! dropped. The kept window is therefore a contiguous, recent suffix of the
//! history, never gappy and never truncated mid-text.
//!
//! Accounting is additive per turn and only approximates the tokenizer's view
//! of the serialized request. Keep `max_total_tokens` below the model's hard
//! limit.

use ragchat_core::message::{Conversation, Turn};
use ragchat_core::token::TokenCounter;
use tracing::{debug, warn};

/// Token ceiling for one model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_total_tokens: usize,
    /// Framing cost charged for every included history turn
    pub per_message_overhead: usize,
}

impl Budget {
    pub fn new(max_total_tokens: usize, per_message_overhead: usize) -> Self {
        Self {
            max_total_tokens,
            per_message_overhead,
        }
    }
}

/// Outcome of a selection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Chosen turns in chronological order
    pub turns: Vec<Turn>,
    /// Tokens charged for everything in `turns`
    pub used_tokens: usize,
    /// History turns left out
    pub dropped: usize,
    /// The mandatory turns alone already exceed the budget
    pub over_budget: bool,
}

/// Chooses which turns of a conversation fit the budget.
pub struct TokenBudgetSelector<'a> {
    counter: &'a dyn TokenCounter,
    budget: Budget,
}

impl<'a> TokenBudgetSelector<'a> {
    pub fn new(counter: &'a dyn TokenCounter, budget: Budget) -> Self {
        Self { counter, budget }
    }

    /// Select turns for `conversation`.
    pub fn select(&self, conversation: &Conversation) -> Selection {
        self.select_with_latest(conversation, conversation.latest())
    }

    /// Select turns, charging and returning `latest` in place of the
    /// conversation's own last turn.
    pub fn select_with_latest(&self, conversation: &Conversation, latest: &Turn) -> Selection {
        if conversation.len() == 1 {
            let used = self.counter.count(&latest.text);
            return Selection {
                turns: vec![latest.clone()],
                used_tokens: used,
                dropped: 0,
                over_budget: used > self.budget.max_total_tokens,
            };
        }

        let first = conversation.system();
        let history = conversation.history();
        let mut used = self.counter.count(&first.text) + self.counter.count(&latest.text);

        let over_budget = used > self.budget.max_total_tokens;
        if over_budget {
            warn!(
                used,
                max = self.budget.max_total_tokens,
                "Mandatory turns exceed token budget, sending them without history"
            );
        }

        let mut kept = 0;
        for turn in history.iter().rev() {
            let cost = self.budget.per_message_overhead + self.counter.count(&turn.text);
            if used + cost > self.budget.max_total_tokens {
                break;
            }
            used += cost;
            kept += 1;
        }

        let window = &history[history.len() - kept..];
        let mut turns = Vec::with_capacity(kept + 2);
        turns.push(first.clone());
        turns.extend_from_slice(window);
        turns.push(latest.clone());

        debug!(
            kept,
            dropped = history.len() - kept,
            used,
            max = self.budget.max_total_tokens,
            "Selected conversation window"
        );

        Selection {
            turns,
            used_tokens: used,
            dropped: history.len() - kept,
            over_budget,
        }
    }
}
