//! In-memory index: useful for tests and local development.
//!
//! With an embedding provider attached, documents are embedded on insert and
//! queries are ranked by cosine similarity. Without one, ranking falls back to
//! counting query terms that occur in each document.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ragchat_core::error::RetrievalError;
use ragchat_core::provider::{EmbeddingRequest, Provider};
use ragchat_core::retrieval::{RetrievedDocument, Retriever};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::vector::rank_by_similarity;

struct Entry {
    document: RetrievedDocument,
    embedding: Option<Vec<f32>>,
}

struct Embedder {
    provider: Arc<dyn Provider>,
    model: String,
}

impl Embedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: vec![text.to_string()],
            })
            .await
            .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::EmbeddingFailed("empty embedding response".into()))
    }
}

/// A document index held entirely in memory.
pub struct InMemoryIndex {
    entries: RwLock<Vec<Entry>>,
    embedder: Option<Embedder>,
}

/// One record of a seed file.
#[derive(Debug, Deserialize)]
struct SeedRecord {
    source_id: String,
    content: String,
}

impl InMemoryIndex {
    /// An empty keyword-ranked index.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            embedder: None,
        }
    }

    /// An empty index that embeds documents and queries through `provider`.
    pub fn with_embeddings(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            embedder: Some(Embedder {
                provider,
                model: model.into(),
            }),
        }
    }

    /// Add a document to the index.
    pub async fn insert(
        &self,
        source_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), RetrievalError> {
        let document = RetrievedDocument::new(source_id, content);
        let embedding = match &self.embedder {
            Some(embedder) => Some(embedder.embed(&document.content).await?),
            None => None,
        };
        self.entries.write().await.push(Entry {
            document,
            embedding,
        });
        Ok(())
    }

    /// Insert every record from a JSON array of `{ "source_id", "content" }`.
    ///
    /// Returns the number of documents added.
    pub async fn load_seed_file(&self, path: &Path) -> Result<usize, RetrievalError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            RetrievalError::NotConfigured(format!("cannot read seed file {}: {e}", path.display()))
        })?;
        let records: Vec<SeedRecord> = serde_json::from_str(&raw).map_err(|e| {
            RetrievalError::NotConfigured(format!("invalid seed file {}: {e}", path.display()))
        })?;

        let count = records.len();
        for record in records {
            self.insert(record.source_id, record.content).await?;
        }
        debug!(path = %path.display(), count, "Seeded in-memory index");
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of distinct query terms present in `content`.
fn keyword_score(terms: &[String], content: &str) -> usize {
    let content = content.to_lowercase();
    terms.iter().filter(|t| content.contains(t.as_str())).count()
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect();
    terms.sort_unstable();
    terms.dedup();
    terms
}

#[async_trait]
impl Retriever for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        if let Some(embedder) = &self.embedder {
            let query_vector = embedder.embed(query).await?;
            let entries = self.entries.read().await;
            let ranked = rank_by_similarity(
                &query_vector,
                entries
                    .iter()
                    .map(|e| e.embedding.as_deref().unwrap_or_default()),
                k,
            );
            return Ok(ranked
                .into_iter()
                .map(|(i, _)| entries[i].document.clone())
                .collect());
        }

        let terms = query_terms(query);
        let entries = self.entries.read().await;
        let mut scored: Vec<(usize, &RetrievedDocument)> = entries
            .iter()
            .map(|e| (keyword_score(&terms, &e.document.content), &e.document))
            .filter(|(score, _)| *score > 0)
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}
