//! Turn and Conversation domain types.
//!
//! These are the core value objects that flow through the entire system:
//! the client sends a conversation → the engine selects a window of turns →
//! the provider generates a response.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The end user
    User,
    /// The language model
    Assistant,
    /// System instructions
    System,
}

/// A single message in a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// The text content
    pub text: String,

    /// Who sent this turn
    pub sender: Sender,
}

impl Turn {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender,
        }
    }

    /// Create a new user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    /// Create a new assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, text)
    }

    /// Create a new system turn.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Sender::System, text)
    }

    /// A copy of this turn carrying different text.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self::new(self.sender, text)
    }

    /// A copy of this turn attributed to a different sender.
    pub fn with_sender(&self, sender: Sender) -> Self {
        Self::new(sender, self.text.clone())
    }
}

/// An ordered, non-empty sequence of turns.
///
/// Order is chronological and load-bearing. By convention the first turn
/// carries the system instruction and the last turn is the newest user query;
/// a single-turn conversation plays both roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Turn>", into = "Vec<Turn>")]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Build a conversation, rejecting an empty turn list.
    pub fn new(turns: Vec<Turn>) -> Result<Self, ChatError> {
        if turns.is_empty() {
            return Err(ChatError::EmptyConversation);
        }
        Ok(Self { turns })
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The first turn (system instruction).
    pub fn system(&self) -> &Turn {
        &self.turns[0]
    }

    /// The last turn (newest query).
    pub fn latest(&self) -> &Turn {
        &self.turns[self.turns.len() - 1]
    }

    /// Turns strictly between the first and the last, oldest first.
    pub fn history(&self) -> &[Turn] {
        if self.turns.len() <= 2 {
            &[]
        } else {
            &self.turns[1..self.turns.len() - 1]
        }
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

impl TryFrom<Vec<Turn>> for Conversation {
    type Error = ChatError;

    fn try_from(turns: Vec<Turn>) -> Result<Self, Self::Error> {
        Self::new(turns)
    }
}

impl From<Conversation> for Vec<Turn> {
    fn from(conversation: Conversation) -> Self {
        conversation.turns
    }
}
