//! Decides when a chat turn needs retrieved context and what to search for.

use std::sync::Arc;
use std::time::Duration;

use ragchat_core::error::RetrievalError;
use ragchat_core::message::{Conversation, Sender};
use ragchat_core::retrieval::{RetrievedDocument, Retriever};
use ragchat_core::token::TokenCounter;
use tracing::{debug, info};

/// Wraps a [`Retriever`] with the follow-up retrieval rules.
///
/// Short conversations (at most `followup_docs + 2` turns) skip retrieval;
/// their context comes from the system-message entry point instead. Longer
/// ones search once with a composite query built from the system turn, the
/// most recent earlier user turns that fit `max_human_tokens`, and the latest
/// turn.
pub struct ContextRetriever {
    retriever: Arc<dyn Retriever>,
    counter: Arc<dyn TokenCounter>,
    max_human_tokens: usize,
    timeout: Duration,
}

impl ContextRetriever {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        counter: Arc<dyn TokenCounter>,
        max_human_tokens: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            counter,
            max_human_tokens,
            timeout,
        }
    }

    /// Whether a chat request over `conversation` retrieves anything.
    pub fn should_retrieve(conversation: &Conversation, followup_docs: usize) -> bool {
        followup_docs > 0 && conversation.len() > followup_docs + 2
    }

    /// Retrieve context for a follow-up chat turn. Makes at most one call.
    pub async fn maybe_retrieve(
        &self,
        conversation: &Conversation,
        followup_docs: usize,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        if !Self::should_retrieve(conversation, followup_docs) {
            debug!(turns = conversation.len(), "Skipping follow-up retrieval");
            return Ok(Vec::new());
        }

        let query = self.build_query(conversation);
        self.search(&query, followup_docs).await
    }

    /// Retrieve context for the system message, using the full document budget.
    pub async fn retrieve_for_system_message(
        &self,
        query: &str,
        num_relevant_docs: usize,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        self.search(query, num_relevant_docs).await
    }

    /// System text, then earlier user turns that fit the sub-budget (walked
    /// newest-first, kept in chronological order), then the latest turn.
    pub fn build_query(&self, conversation: &Conversation) -> String {
        let mut used = 0;
        let mut recent_human = Vec::new();
        for turn in conversation
            .history()
            .iter()
            .rev()
            .filter(|t| t.sender == Sender::User)
        {
            used += self.counter.count(&turn.text);
            if used > self.max_human_tokens {
                break;
            }
            recent_human.push(turn.text.as_str());
        }
        recent_human.reverse();

        let mut parts = Vec::with_capacity(recent_human.len() + 2);
        parts.push(conversation.system().text.as_str());
        parts.extend(recent_human);
        parts.push(conversation.latest().text.as_str());
        parts.join("\n")
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let documents = tokio::time::timeout(self.timeout, self.retriever.search(query, k))
            .await
            .map_err(|_| RetrievalError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })??;

        info!(
            backend = self.retriever.name(),
            k,
            found = documents.len(),
            "Retrieved context documents"
        );
        Ok(documents)
    }
}
