//! HTTP API gateway for ragchat.
//!
//! Exposes the chat pipeline over HTTP:
//!
//! - `GET  /health`: liveness probe
//! - `POST /system_message`: instruction plus retrieved context for a new conversation
//! - `POST /chat_stream`: SSE stream of answer tokens
//! - `POST /chat`: the whole answer in one JSON response

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    response::{
        Json,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use ragchat_config::AppConfig;
use ragchat_core::error::ChatError;
use ragchat_core::message::Conversation;
use ragchat_engine::{ChatService, ChatSettings, StreamEvent, counter_for};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub chat: ChatService,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - CORS limited to `allowed_origins`
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/system_message", post(system_message_handler))
        .route("/chat_stream", post(chat_stream_handler))
        .route("/chat", post(chat_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors_layer(allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

/// Wire the provider, retriever and token counter named by `config` into a
/// [`ChatService`].
pub async fn build_chat_service(
    config: &AppConfig,
) -> Result<ChatService, Box<dyn std::error::Error>> {
    let providers = ragchat_providers::build_from_config(config);
    let provider = providers.default_provider().ok_or_else(|| {
        format!(
            "No provider registered under '{}'",
            config.default_provider
        )
    })?;
    if !config.has_api_key() {
        warn!(provider = %config.default_provider, "No API key configured, model calls will likely fail");
    }

    let retriever = ragchat_retrieval::build_from_config(config, provider.clone()).await?;
    let counter = counter_for(&config.encoding, &config.model);

    Ok(ChatService::new(
        provider,
        retriever,
        counter,
        ChatSettings::from_config(config),
    ))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let chat = build_chat_service(&config).await?;
    let app = build_router(Arc::new(GatewayState { chat }), &config.gateway.allowed_origins);

    info!(addr = %addr, model = %config.model, backend = %config.retrieval.backend, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

// --- Errors ---

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: ChatError) -> ApiError {
    let status = match &err {
        ChatError::EmptyConversation => StatusCode::BAD_REQUEST,
        ChatError::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ChatError::RetrievalFailed(_)
        | ChatError::ModelInvocationFailed(_)
        | ChatError::StreamFailed(_) => StatusCode::BAD_GATEWAY,
    };
    warn!(status = status.as_u16(), error = %err, "Request failed");
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

// --- Handlers ---

async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
struct SystemMessageRequest {
    text: String,
}

#[derive(Serialize)]
struct SystemMessageResponse {
    system_message: String,
}

async fn system_message_handler(
    State(state): State<SharedState>,
    Json(payload): Json<SystemMessageRequest>,
) -> Result<Json<SystemMessageResponse>, ApiError> {
    info!(query_len = payload.text.len(), "System message request");

    let system_message = state
        .chat
        .system_message(&payload.text)
        .await
        .map_err(api_error)?;
    Ok(Json(SystemMessageResponse { system_message }))
}

/// `POST /chat_stream`: one SSE `data` frame per token; an `error` event
/// precedes closure when generation fails.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(conversation): Json<Conversation>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    info!(turns = conversation.len(), "Chat stream request");

    let events = state
        .chat
        .chat_stream(conversation)
        .await
        .map_err(api_error)?;

    let stream = events.into_stream().filter_map(|event| async move {
        match event {
            StreamEvent::Token { content } => Some(Ok(SseEvent::default().data(sse_safe(&content)))),
            StreamEvent::Error { message } => Some(Ok(SseEvent::default()
                .event("error")
                .data(sse_safe(&message)))),
            StreamEvent::Done => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Serialize)]
struct ChatResponse {
    message: String,
}

/// `POST /chat`: same body as `/chat_stream`, answers once generation ends.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(conversation): Json<Conversation>,
) -> Result<Json<ChatResponse>, ApiError> {
    info!(turns = conversation.len(), "Chat request");

    let message = state.chat.chat(conversation).await.map_err(api_error)?;
    Ok(Json(ChatResponse { message }))
}

/// SSE frames cannot carry carriage returns.
fn sse_safe(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
