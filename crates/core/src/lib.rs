//! # ragchat core
//!
//! Domain types, collaborator traits, and error definitions for the ragchat
//! retrieval-augmented chat backend. This crate has **zero framework
//! dependencies**: it defines the domain model every other crate implements
//! against.
//!
//! ## Collaborators
//!
//! The chat engine talks to three external capabilities, each defined as a
//! trait here so they can be swapped via configuration or mocked in tests:
//! - [`Provider`]: model invocation, streamed token by token
//! - [`Retriever`]: semantic document search over a vector index
//! - [`TokenCounter`]: budget accounting

pub mod error;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use error::{ChatError, ProviderError, RetrievalError};
pub use message::{Conversation, Sender, Turn};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use retrieval::{RetrievedDocument, Retriever};
pub use token::TokenCounter;
