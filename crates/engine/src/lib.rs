//! The chat pipeline.
//!
//! One request flows through:
//!
//! 1. **Retrieve** context for follow-up questions ([`retriever`])
//! 2. **Assemble** the prompt under the token budget ([`context`])
//! 3. **Generate** with the configured provider, token by token
//! 4. **Stream** every token to the caller through a [`bridge`]
//!
//! [`ChatService`] ties the steps together and runs each request on its own
//! background worker.

pub mod bridge;
pub mod context;
pub mod retriever;
pub mod service;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bridge::{EventStream, StreamHandle};
pub use context::{
    AssembledPrompt, Budget, HeuristicCounter, PromptAssembler, Selection, TiktokenCounter,
    TokenBudgetSelector, counter_for,
};
pub use retriever::ContextRetriever;
pub use service::{ChatService, ChatSettings};
pub use stream_event::StreamEvent;
