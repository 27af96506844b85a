//! ChatService: runs one chat request end to end.
//!
//! For every request a background worker retrieves context (maybe), assembles
//! the prompt and streams the model's tokens into a [`bridge`] handle; the
//! caller gets the [`EventStream`] back immediately. Workers in flight are
//! capped by a semaphore; requests over the cap wait for a free slot.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use ragchat_config::{AppConfig, RetrievalFailurePolicy};
use ragchat_core::error::{ChatError, RetrievalError};
use ragchat_core::message::Conversation;
use ragchat_core::provider::{Provider, ProviderRequest};
use ragchat_core::retrieval::{RetrievedDocument, Retriever};
use ragchat_core::token::TokenCounter;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::bridge::{self, EventStream, StreamHandle};
use crate::context::{Budget, PromptAssembler, format_context_block};
use crate::retriever::ContextRetriever;

/// Every tunable the chat pipeline reads, fixed at construction.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f32,
    pub max_response_tokens: Option<u32>,
    pub budget: Budget,
    pub max_human_tokens: usize,
    pub num_relevant_docs: usize,
    pub num_relevant_followup_docs: usize,
    pub on_retrieval_failure: RetrievalFailurePolicy,
    pub retrieval_timeout: Duration,
    /// `None` waits for the producer indefinitely
    pub idle_timeout: Option<Duration>,
    pub max_concurrent_streams: usize,
    pub system_instruction: String,
}

impl ChatSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_response_tokens: config.max_response_tokens,
            budget: Budget::new(
                config.budget.max_total_tokens,
                config.budget.tokens_per_message,
            ),
            max_human_tokens: config.budget.max_human_tokens,
            num_relevant_docs: config.retrieval.num_relevant_docs,
            num_relevant_followup_docs: config.retrieval.num_relevant_followup_docs,
            on_retrieval_failure: config.retrieval.on_failure,
            retrieval_timeout: Duration::from_secs(config.retrieval.timeout_secs),
            idle_timeout: (config.stream.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(config.stream.idle_timeout_secs)),
            max_concurrent_streams: config.stream.max_concurrent_streams,
            system_instruction: config.system_instruction.clone(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

struct ServiceInner {
    provider: Arc<dyn Provider>,
    retriever: ContextRetriever,
    assembler: PromptAssembler,
    settings: ChatSettings,
    permits: Arc<Semaphore>,
}

/// Cheap to clone; clones share collaborators and the concurrency cap.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<ServiceInner>,
}

impl ChatService {
    pub fn new(
        provider: Arc<dyn Provider>,
        retriever: Arc<dyn Retriever>,
        counter: Arc<dyn TokenCounter>,
        settings: ChatSettings,
    ) -> Self {
        let retriever = ContextRetriever::new(
            retriever,
            counter.clone(),
            settings.max_human_tokens,
            settings.retrieval_timeout,
        );
        let assembler = PromptAssembler::new(counter, settings.budget);
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_streams.max(1)));

        Self {
            inner: Arc::new(ServiceInner {
                provider,
                retriever,
                assembler,
                settings,
                permits,
            }),
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.inner.settings
    }

    /// Start a chat request and return its event stream.
    ///
    /// Waits for a worker slot when `max_concurrent_streams` are in flight.
    pub async fn chat_stream(&self, conversation: Conversation) -> Result<EventStream, ChatError> {
        let limit = self.inner.settings.max_concurrent_streams;
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ChatError::Overloaded { limit })?;

        let (handle, events) = bridge::open();
        let inner = self.inner.clone();
        let span = info_span!("chat", request_id = %Uuid::new_v4(), turns = conversation.len());

        tokio::spawn(
            async move {
                let _permit = permit;
                inner.run(conversation, handle).await;
            }
            .instrument(span),
        );

        Ok(events.with_idle_timeout(self.inner.settings.idle_timeout))
    }

    /// Run a chat request to completion and return the full answer.
    pub async fn chat(&self, conversation: Conversation) -> Result<String, ChatError> {
        self.chat_stream(conversation)
            .await?
            .collect_text()
            .await
            .map_err(ChatError::StreamFailed)
    }

    /// Build the instruction-plus-context block for a new conversation.
    pub async fn system_message(&self, query: &str) -> Result<String, ChatError> {
        let settings = &self.inner.settings;
        let result = self
            .inner
            .retriever
            .retrieve_for_system_message(query, settings.num_relevant_docs)
            .await;
        let documents = self.inner.handle_retrieval(result)?;

        let block = format_context_block(&documents);
        if block.is_empty() {
            Ok(settings.system_instruction.clone())
        } else {
            Ok(format!(
                "{}\n\nRelevant context: {block}",
                settings.system_instruction
            ))
        }
    }
}

impl ServiceInner {
    async fn run(&self, conversation: Conversation, mut handle: StreamHandle) {
        match self.produce(&conversation, &mut handle).await {
            Ok(completion) if handle.is_cancelled() => {
                info!(chars = completion.len(), "Client disconnected, stopped generating");
                handle.finish();
            }
            Ok(completion) => {
                info!(chars = completion.len(), "Chat completion finished");
                handle.finish();
            }
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                handle.fail(e.to_string());
            }
        }
    }

    async fn produce(
        &self,
        conversation: &Conversation,
        handle: &mut StreamHandle,
    ) -> Result<String, ChatError> {
        let result = self
            .retriever
            .maybe_retrieve(conversation, self.settings.num_relevant_followup_docs)
            .await;
        let documents = self.handle_retrieval(result)?;

        let prompt = self.assembler.assemble(conversation, &documents);
        info!(
            turns = prompt.turns.len(),
            dropped = prompt.dropped_turns,
            documents = prompt.context_documents,
            tokens = prompt.used_tokens,
            "Assembled prompt"
        );

        if handle.is_cancelled() {
            debug!("Client gone before model invocation");
            return Ok(String::new());
        }

        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages: prompt.turns,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_response_tokens,
            stream: true,
            stop: Vec::new(),
        };

        let completion = self
            .provider
            .generate(request, &mut |token: &str| {
                if handle.emit(token) {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            })
            .await?;
        Ok(completion)
    }

    fn handle_retrieval(
        &self,
        result: Result<Vec<RetrievedDocument>, RetrievalError>,
    ) -> Result<Vec<RetrievedDocument>, ChatError> {
        match (result, self.settings.on_retrieval_failure) {
            (Ok(documents), _) => Ok(documents),
            (Err(e), RetrievalFailurePolicy::Degrade) => {
                warn!(error = %e, "Retrieval failed, continuing without context");
                Ok(Vec::new())
            }
            (Err(e), RetrievalFailurePolicy::Abort) => {
                warn!(error = %e, "Retrieval failed, aborting request");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token::HeuristicCounter;
    use crate::stream_event::StreamEvent;
    use crate::test_helpers::{ScriptedProvider, ScriptedRetriever};
    use ragchat_core::message::{Sender, Turn};

    fn settings() -> ChatSettings {
        ChatSettings {
            model: "test-model".into(),
            idle_timeout: None,
            ..ChatSettings::default()
        }
    }

    fn service(
        provider: Arc<ScriptedProvider>,
        retriever: Arc<ScriptedRetriever>,
        settings: ChatSettings,
    ) -> ChatService {
        ChatService::new(provider, retriever, Arc::new(HeuristicCounter), settings)
    }

    fn followup_conversation() -> Conversation {
        Conversation::new(vec![
            Turn::user("You explain the recommendation algorithm."),
            Turn::user("What is SimClusters?"),
            Turn::assistant("A community detection system."),
            Turn::user("Where is it implemented?"),
        ])
        .unwrap()
    }

    async fn drain(mut events: EventStream) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(event) = events.recv().await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn streams_tokens_then_done() {
        let provider = Arc::new(ScriptedProvider::new(&["Sim", "Clusters", " lives in src/"]));
        let retriever = Arc::new(ScriptedRetriever::returning(vec![]));
        let svc = service(provider.clone(), retriever, settings());

        let events = svc.chat_stream(followup_conversation()).await.unwrap();
        assert_eq!(
            drain(events).await,
            vec![
                StreamEvent::token("Sim"),
                StreamEvent::token("Clusters"),
                StreamEvent::token(" lives in src/"),
                StreamEvent::Done,
            ]
        );

        let request = &provider.requests()[0];
        assert_eq!(request.model, "test-model");
        assert!(request.stream);
        assert_eq!(request.messages[0].sender, Sender::System);
    }

    #[tokio::test]
    async fn followup_context_is_added_to_latest_turn() {
        let provider = Arc::new(ScriptedProvider::new(&["ok"]));
        let retriever = Arc::new(ScriptedRetriever::returning(vec![RetrievedDocument::new(
            "src/scala/simclusters_v2/README.md",
            "SimClusters overview",
        )]));
        let svc = service(provider.clone(), retriever.clone(), settings());

        svc.chat(followup_conversation()).await.unwrap();

        assert_eq!(retriever.calls(), 1);
        assert_eq!(retriever.last_k(), Some(1));
        let last = provider.requests()[0].messages.last().unwrap().text.clone();
        assert_eq!(
            last,
            "Relevant context: From file src/scala/simclusters_v2/README.md:\nSimClusters overview\n\nWhere is it implemented?"
        );
    }

    #[tokio::test]
    async fn first_turn_skips_retrieval() {
        let provider = Arc::new(ScriptedProvider::new(&["hi"]));
        let retriever = Arc::new(ScriptedRetriever::returning(vec![]));
        let svc = service(provider, retriever.clone(), settings());

        let conv = Conversation::new(vec![Turn::user("sys"), Turn::user("hello")]).unwrap();
        assert_eq!(svc.chat(conv).await.unwrap(), "hi");
        assert_eq!(retriever.calls(), 0);
    }

    #[tokio::test]
    async fn model_failure_closes_stream_with_error() {
        let provider = Arc::new(ScriptedProvider::new(&["Hi", " there"]).failing_after("boom"));
        let retriever = Arc::new(ScriptedRetriever::returning(vec![]));
        let svc = service(provider, retriever, settings());

        let out = drain(svc.chat_stream(followup_conversation()).await.unwrap()).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], StreamEvent::token("Hi"));
        assert_eq!(out[1], StreamEvent::token(" there"));
        assert!(matches!(&out[2], StreamEvent::Error { message } if message.contains("boom")));
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_by_default() {
        let provider = Arc::new(ScriptedProvider::new(&["answer"]));
        let retriever = Arc::new(ScriptedRetriever::failing("index offline"));
        let svc = service(provider.clone(), retriever, settings());

        assert_eq!(svc.chat(followup_conversation()).await.unwrap(), "answer");
        let last = provider.requests()[0].messages.last().unwrap().text.clone();
        assert_eq!(last, "Where is it implemented?");
    }

    #[tokio::test]
    async fn retrieval_failure_can_abort() {
        let provider = Arc::new(ScriptedProvider::new(&["never"]));
        let retriever = Arc::new(ScriptedRetriever::failing("index offline"));
        let svc = service(
            provider.clone(),
            retriever,
            ChatSettings {
                on_retrieval_failure: RetrievalFailurePolicy::Abort,
                ..settings()
            },
        );

        let out = drain(svc.chat_stream(followup_conversation()).await.unwrap()).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], StreamEvent::Error { message } if message.contains("index offline")));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn system_message_includes_context() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let retriever = Arc::new(ScriptedRetriever::returning(vec![
            RetrievedDocument::new("a.py", "x"),
            RetrievedDocument::new("b.py", "y"),
        ]));
        let svc = service(
            provider,
            retriever.clone(),
            ChatSettings {
                system_instruction: "Answer using the code.".into(),
                ..settings()
            },
        );

        let message = svc.system_message("how is x used?").await.unwrap();
        assert_eq!(
            message,
            "Answer using the code.\n\nRelevant context: From file a.py:\nx\n\nFrom file b.py:\ny"
        );
        assert_eq!(retriever.last_k(), Some(3));
    }

    #[tokio::test]
    async fn system_message_without_documents_is_instruction_only() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let retriever = Arc::new(ScriptedRetriever::failing("index offline"));
        let svc = service(
            provider,
            retriever,
            ChatSettings {
                system_instruction: "Answer using the code.".into(),
                ..settings()
            },
        );
        assert_eq!(
            svc.system_message("q").await.unwrap(),
            "Answer using the code."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_stops_generation() {
        let tokens: Vec<String> = (0..100).map(|i| format!("t{i} ")).collect();
        let token_refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let provider =
            Arc::new(ScriptedProvider::new(&token_refs).with_delay(Duration::from_millis(10)));
        let retriever = Arc::new(ScriptedRetriever::returning(vec![]));
        let svc = service(provider.clone(), retriever, settings());

        let mut events = svc.chat_stream(followup_conversation()).await.unwrap();
        assert_eq!(events.recv().await, Some(StreamEvent::token("t0 ")));
        drop(events);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(provider.sent() < 10, "provider kept going: {}", provider.sent());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_model_hits_idle_timeout() {
        let provider =
            Arc::new(ScriptedProvider::new(&["late"]).with_delay(Duration::from_secs(600)));
        let retriever = Arc::new(ScriptedRetriever::returning(vec![]));
        let svc = service(
            provider,
            retriever,
            ChatSettings {
                idle_timeout: Some(Duration::from_secs(60)),
                ..settings()
            },
        );

        let out = drain(svc.chat_stream(followup_conversation()).await.unwrap()).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], StreamEvent::Error { message } if message.contains("idle timeout")));
    }

    #[tokio::test]
    async fn concurrency_cap_queues_extra_requests() {
        let provider = Arc::new(
            ScriptedProvider::new(&["a", "b"]).with_delay(Duration::from_millis(200)),
        );
        let retriever = Arc::new(ScriptedRetriever::returning(vec![]));
        let svc = service(
            provider,
            retriever,
            ChatSettings {
                max_concurrent_streams: 1,
                ..settings()
            },
        );

        let first = svc.chat_stream(followup_conversation()).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), svc.chat_stream(followup_conversation()))
                .await;
        assert!(blocked.is_err(), "second request should wait for a slot");

        assert_eq!(first.collect_text().await.unwrap(), "ab");
        let second = svc.chat_stream(followup_conversation()).await.unwrap();
        assert_eq!(second.collect_text().await.unwrap(), "ab");
    }
}
