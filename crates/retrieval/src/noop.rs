//! No-op retriever: disables context retrieval entirely.

use async_trait::async_trait;
use ragchat_core::error::RetrievalError;
use ragchat_core::retrieval::{RetrievedDocument, Retriever};

/// A retriever that never finds anything.
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    fn name(&self) -> &str {
        "none"
    }

    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        Ok(Vec::new())
    }
}
