//! Retrieval backends for ragchat.
//!
//! Every backend implements `ragchat_core::Retriever`; `build_from_config`
//! picks one from `[retrieval] backend`.

pub mod in_memory;
pub mod noop;
pub mod pinecone;
pub mod vector;

use std::sync::Arc;
use std::time::Duration;

use ragchat_config::{AppConfig, MemoryRanking};
use ragchat_core::error::RetrievalError;
use ragchat_core::provider::Provider;
use ragchat_core::retrieval::Retriever;
use tracing::info;

pub use in_memory::InMemoryIndex;
pub use noop::NoopRetriever;
pub use pinecone::{PineconeRetriever, PineconeSettings};
pub use vector::{cosine_similarity, rank_by_similarity};

/// Build the configured retriever.
///
/// `embedder` embeds queries for backends that need vectors.
pub async fn build_from_config(
    config: &AppConfig,
    embedder: Arc<dyn Provider>,
) -> Result<Arc<dyn Retriever>, RetrievalError> {
    let retrieval = &config.retrieval;

    let retriever: Arc<dyn Retriever> = match retrieval.backend.as_str() {
        "none" => Arc::new(NoopRetriever),
        "memory" => {
            let index = match retrieval.ranking {
                MemoryRanking::Keyword => InMemoryIndex::new(),
                MemoryRanking::Embedding => {
                    InMemoryIndex::with_embeddings(embedder, &retrieval.embedding_model)
                }
            };
            if let Some(path) = &retrieval.seed_file {
                index.load_seed_file(path).await?;
            }
            Arc::new(index)
        }
        "pinecone" => {
            let api_key = retrieval.api_key.clone().ok_or_else(|| {
                RetrievalError::NotConfigured(
                    "pinecone backend needs retrieval.api_key or PINECONE_API_KEY".into(),
                )
            })?;
            let settings = PineconeSettings {
                api_key,
                host: retrieval.index_host.clone(),
                index: retrieval.index.clone(),
                namespace: retrieval.namespace.clone().unwrap_or_default(),
                text_key: retrieval.text_key.clone(),
                embedding_model: retrieval.embedding_model.clone(),
                timeout: Duration::from_secs(retrieval.timeout_secs),
            };
            Arc::new(PineconeRetriever::connect(settings, embedder).await?)
        }
        other => {
            return Err(RetrievalError::NotConfigured(format!(
                "unknown retrieval backend '{other}'"
            )));
        }
    };

    info!(backend = retriever.name(), "Retrieval backend ready");
    Ok(retriever)
}
