//! Shared test doubles for the engine tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ragchat_core::error::{ProviderError, RetrievalError};
use ragchat_core::message::Turn;
use ragchat_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
use ragchat_core::retrieval::{RetrievedDocument, Retriever};
use ragchat_core::token::TokenCounter;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::context::token::HeuristicCounter;

/// Token counts looked up from a table; unknown text falls back to the
/// ~4 chars/token estimate.
#[derive(Default)]
pub struct TableCounter {
    table: HashMap<String, usize>,
}

impl TableCounter {
    pub fn new<K: Into<String>>(entries: impl IntoIterator<Item = (K, usize)>) -> Self {
        Self {
            table: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl TokenCounter for TableCounter {
    fn count(&self, text: &str) -> usize {
        self.table
            .get(text)
            .copied()
            .unwrap_or_else(|| HeuristicCounter.count(text))
    }
}

/// A provider that streams a fixed list of tokens, optionally failing at the
/// end and optionally sleeping before each token.
pub struct ScriptedProvider {
    tokens: Vec<String>,
    fail_with: Option<String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ProviderRequest>>,
    sent: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            fail_with: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
            sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail with a stream interruption after all tokens are sent.
    pub fn failing_after(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Tokens actually handed to the reader.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ProviderResponse {
            message: Turn::assistant(self.tokens.concat()),
            usage: None,
            model: request.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        self.requests.lock().unwrap().push(request);

        let (tx, rx) = mpsc::channel(1);
        let tokens = self.tokens.clone();
        let fail_with = self.fail_with.clone();
        let delay = self.delay;
        let sent = self.sent.clone();

        tokio::spawn(async move {
            for token in tokens {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let chunk = StreamChunk {
                    content: Some(token),
                    ..StreamChunk::default()
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
                sent.fetch_add(1, Ordering::SeqCst);
            }
            let last = match fail_with {
                Some(message) => Err(ProviderError::StreamInterrupted(message)),
                None => Ok(StreamChunk {
                    done: true,
                    ..StreamChunk::default()
                }),
            };
            let _ = tx.send(last).await;
        });

        Ok(rx)
    }
}

/// A retriever returning canned documents (or a canned failure) and
/// recording every call.
pub struct ScriptedRetriever {
    result: Result<Vec<RetrievedDocument>, RetrievalError>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, usize)>>,
}

impl ScriptedRetriever {
    pub fn returning(documents: Vec<RetrievedDocument>) -> Self {
        Self {
            result: Ok(documents),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(RetrievalError::QueryFailed(message.to_string())),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_query(&self) -> Option<String> {
        self.calls.lock().unwrap().last().map(|(q, _)| q.clone())
    }

    pub fn last_k(&self) -> Option<usize> {
        self.calls.lock().unwrap().last().map(|(_, k)| *k)
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        self.calls.lock().unwrap().push((query.to_string(), k));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone().map(|docs| docs.into_iter().take(k).collect())
    }
}
