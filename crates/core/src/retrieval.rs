//! Retriever trait: semantic document search over a vector index.
//!
//! The chat engine only needs one capability from the index: given a query
//! string and a count, return the most relevant documents, most relevant
//! first. How documents are embedded, stored and ranked is the backend's
//! business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// A document returned by a retrieval call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// Where the content came from (file path, URL, ...)
    pub source_id: String,

    /// The retrieved text
    pub content: String,
}

impl RetrievedDocument {
    pub fn new(source_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            content: content.into(),
        }
    }
}

/// The core Retriever trait.
///
/// Implementations: Pinecone-compatible remote index, in-memory index
/// (for testing and local development), none (no-op).
///
/// Implementations must be safe for concurrent, independent calls.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// The backend name (e.g., "pinecone", "memory", "none").
    fn name(&self) -> &str;

    /// Return up to `k` documents relevant to `query`, most relevant first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, RetrievalError>;
}
