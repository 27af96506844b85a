//! Pinecone-compatible remote index.
//!
//! Queries are embedded through the configured provider and sent to the
//! index data plane at `{host}/query`. Document text is read from the
//! `text_key` metadata field and the source path from `document_id`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ragchat_core::error::RetrievalError;
use ragchat_core::provider::{EmbeddingRequest, Provider};
use ragchat_core::retrieval::{RetrievedDocument, Retriever};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const CONTROLLER_URL: &str = "https://api.pinecone.io/indexes";

/// Connection settings for a Pinecone index.
#[derive(Clone)]
pub struct PineconeSettings {
    pub api_key: String,
    /// Data-plane host; resolved from `index` when absent
    pub host: Option<String>,
    pub index: Option<String>,
    pub namespace: String,
    pub text_key: String,
    pub embedding_model: String,
    pub timeout: Duration,
}

pub struct PineconeRetriever {
    client: Client,
    host: String,
    api_key: String,
    namespace: String,
    text_key: String,
    embedding_model: String,
    embedder: Arc<dyn Provider>,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    vector: Vec<f32>,
    #[serde(rename = "topK")]
    top_k: usize,
    namespace: &'a str,
    #[serde(rename = "includeMetadata")]
    include_metadata: bool,
    #[serde(rename = "includeValues")]
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct DescribeIndexResponse {
    host: String,
}

impl PineconeRetriever {
    /// Build a retriever, looking up the data-plane host from the index name
    /// when no host is configured.
    pub async fn connect(
        settings: PineconeSettings,
        embedder: Arc<dyn Provider>,
    ) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_default();

        let host = match (&settings.host, &settings.index) {
            (Some(host), _) => normalize_host(host),
            (None, Some(index)) => describe_host(&client, &settings.api_key, index).await?,
            (None, None) => {
                return Err(RetrievalError::NotConfigured(
                    "pinecone backend needs retrieval.index_host or retrieval.index".into(),
                ));
            }
        };

        debug!(host = %host, namespace = %settings.namespace, "Connected to Pinecone index");

        Ok(Self {
            client,
            host,
            api_key: settings.api_key,
            namespace: settings.namespace,
            text_key: settings.text_key,
            embedding_model: settings.embedding_model,
            embedder,
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        let response = self
            .embedder
            .embed(EmbeddingRequest {
                model: self.embedding_model.clone(),
                inputs: vec![query.to_string()],
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

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

async fn describe_host(client: &Client, api_key: &str, index: &str) -> Result<String, RetrievalError> {
    let resp = client
        .get(format!("{CONTROLLER_URL}/{index}"))
        .header("Api-Key", api_key)
        .send()
        .await
        .map_err(|e| RetrievalError::NotConfigured(format!("Pinecone: {e}")))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(RetrievalError::NotConfigured(format!(
            "Pinecone describe_index {index} returned {status}: {body}"
        )));
    }

    let info: DescribeIndexResponse = resp
        .json()
        .await
        .map_err(|e| RetrievalError::NotConfigured(e.to_string()))?;
    Ok(normalize_host(&info.host))
}

/// Turn query matches into documents, preserving match order.
fn documents_from_matches(matches: Vec<QueryMatch>, text_key: &str) -> Vec<RetrievedDocument> {
    matches
        .into_iter()
        .filter_map(|m| {
            let metadata = m.metadata.unwrap_or_default();
            let Some(content) = metadata.get(text_key).and_then(|v| v.as_str()) else {
                warn!(id = %m.id, text_key, "Match has no text metadata, skipping");
                return None;
            };
            let source_id = metadata
                .get("document_id")
                .and_then(|v| v.as_str())
                .unwrap_or(m.id.as_str());
            Some(RetrievedDocument::new(source_id, content))
        })
        .collect()
}

#[async_trait]
impl Retriever for PineconeRetriever {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embed_query(query).await?;
        let request = QueryRequest {
            vector,
            top_k: k,
            namespace: &self.namespace,
            include_metadata: true,
            include_values: false,
        };

        let resp = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::QueryFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RetrievalError::QueryFailed(format!(
                "query returned {status}: {body}"
            )));
        }

        let response: QueryResponse = resp
            .json()
            .await
            .map_err(|e| RetrievalError::QueryFailed(format!("bad query response: {e}")))?;

        let documents = documents_from_matches(response.matches, &self.text_key);
        debug!(k, found = documents.len(), "Pinecone query complete");
        Ok(documents)
    }
}
