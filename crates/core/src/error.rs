//! Error types for the ragchat domain.
//!
//! Each bounded context has its own error enum; `ChatError` wraps the
//! provider and retrieval failures a chat request can hit.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Index query failed: {0}")]
    QueryFailed(String),

    #[error("Query embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Retrieval backend not configured: {0}")]
    NotConfigured(String),

    #[error("Retrieval timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Failures of a single chat request.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("Conversation must contain at least one turn")]
    EmptyConversation,

    #[error("Context retrieval failed: {0}")]
    RetrievalFailed(#[from] RetrievalError),

    #[error("Model invocation failed: {0}")]
    ModelInvocationFailed(#[from] ProviderError),

    #[error("Too many concurrent streams (limit {limit})")]
    Overloaded { limit: usize },

    #[error("Response stream failed: {0}")]
    StreamFailed(String),
}
