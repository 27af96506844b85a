//! Response stream events.
//!
//! `StreamEvent` is what a chat worker hands to the transport: one variant per
//! token, then exactly one terminal `Done` or `Error`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// One model token, in production order.
    Token { content: String },

    /// The completion finished normally.
    Done,

    /// The request failed; no further events follow.
    Error { message: String },
}

impl StreamEvent {
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    /// `Done` and `Error` end the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token { .. })
    }
}
