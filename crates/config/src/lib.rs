//! Configuration loading, validation, and management for ragchat.
//!
//! Loads configuration from `~/.ragchat/config.toml` with environment
//! variable overrides. Validated once at startup and never mutated
//! afterwards; every tunable reaches the chat engine through this struct.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ragchat/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Chat model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Tokenizer encoding used for budget accounting (e.g. "cl100k_base")
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per model response (unset = provider default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<u32>,

    /// Instruction placed ahead of retrieved context by `/system_message`
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,

    /// Prompt token budget
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Retrieval index configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Response streaming limits
    #[serde(default)]
    pub stream: StreamConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_encoding() -> String {
    "cl100k_base".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_system_instruction() -> String {
    "You are a helpful assistant that answers questions about a codebase. \
     Use the provided context when it is relevant and say so when it is not."
        .into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("model", &self.model)
            .field("encoding", &self.encoding)
            .field("temperature", &self.temperature)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("system_instruction", &self.system_instruction)
            .field("budget", &self.budget)
            .field("retrieval", &self.retrieval)
            .field("stream", &self.stream)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("organization", &self.organization)
            .finish()
    }
}

impl std::fmt::Debug for RetrievalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalConfig")
            .field("backend", &self.backend)
            .field("num_relevant_docs", &self.num_relevant_docs)
            .field("num_relevant_followup_docs", &self.num_relevant_followup_docs)
            .field("index", &self.index)
            .field("index_host", &self.index_host)
            .field("namespace", &self.namespace)
            .field("api_key", &redact(&self.api_key))
            .field("embedding_model", &self.embedding_model)
            .field("text_key", &self.text_key)
            .field("on_failure", &self.on_failure)
            .field("timeout_secs", &self.timeout_secs)
            .field("seed_file", &self.seed_file)
            .field("ranking", &self.ranking)
            .finish()
    }
}

/// Token budget for prompt assembly.
///
/// Accounting is additive and approximate; keep `max_total_tokens` below the
/// model's real context limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Ceiling for system turn + history window + latest query
    #[serde(default = "default_max_total_tokens")]
    pub max_total_tokens: usize,

    /// Framing cost charged per included history turn
    #[serde(default = "default_tokens_per_message")]
    pub tokens_per_message: usize,

    /// Sub-budget for earlier human turns folded into the retrieval query
    #[serde(default = "default_max_human_tokens")]
    pub max_human_tokens: usize,
}

fn default_max_total_tokens() -> usize {
    3000
}
fn default_tokens_per_message() -> usize {
    4
}
fn default_max_human_tokens() -> usize {
    1000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_total_tokens: default_max_total_tokens(),
            tokens_per_message: default_tokens_per_message(),
            max_human_tokens: default_max_human_tokens(),
        }
    }
}

/// What to do when the retrieval backend fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalFailurePolicy {
    /// Continue without added context
    #[default]
    Degrade,
    /// Fail the whole request
    Abort,
}

/// How the memory backend ranks documents against a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryRanking {
    /// Count query terms present in each document
    #[default]
    Keyword,
    /// Cosine similarity of `embedding_model` vectors
    Embedding,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// "pinecone", "memory", or "none"
    #[serde(default = "default_retrieval_backend")]
    pub backend: String,

    /// Documents fetched by the system-message entry point
    #[serde(default = "default_num_relevant_docs")]
    pub num_relevant_docs: usize,

    /// Documents fetched for follow-up chat turns
    #[serde(default = "default_num_relevant_followup_docs")]
    pub num_relevant_followup_docs: usize,

    /// Index name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Index data-plane host (e.g. "https://my-index-abc123.svc.us-east1-gcp.pinecone.io")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_host: Option<String>,

    /// Namespace within the index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Index API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Embedding model used to embed queries
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Metadata field holding the document text
    #[serde(default = "default_text_key")]
    pub text_key: String,

    #[serde(default)]
    pub on_failure: RetrievalFailurePolicy,

    /// Upper bound on a single retrieval call
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,

    /// JSON array of `{ source_id, content }` loaded into the memory backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<PathBuf>,

    /// Ranking used by the memory backend
    #[serde(default)]
    pub ranking: MemoryRanking,
}

fn default_retrieval_backend() -> String {
    "pinecone".into()
}
fn default_num_relevant_docs() -> usize {
    3
}
fn default_num_relevant_followup_docs() -> usize {
    1
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".into()
}
fn default_text_key() -> String {
    "text".into()
}
fn default_retrieval_timeout() -> u64 {
    10
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: default_retrieval_backend(),
            num_relevant_docs: default_num_relevant_docs(),
            num_relevant_followup_docs: default_num_relevant_followup_docs(),
            index: None,
            index_host: None,
            namespace: None,
            api_key: None,
            embedding_model: default_embedding_model(),
            text_key: default_text_key(),
            on_failure: RetrievalFailurePolicy::default(),
            timeout_secs: default_retrieval_timeout(),
            seed_file: None,
            ranking: MemoryRanking::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Longest wait for the next token before the stream is failed (0 = no limit)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Cap on model-invocation workers in flight at once
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: usize,
}

fn default_idle_timeout() -> u64 {
    60
}
fn default_max_concurrent_streams() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            max_concurrent_streams: default_max_concurrent_streams(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost".into(),
        "http://localhost:8080".into(),
        "http://localhost:3000".into(),
    ]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Organization header sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.ragchat/config.toml).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load configuration from `path`, then apply environment overrides.
    ///
    /// Checked variables:
    /// - `RAGCHAT_API_KEY`, then `OPENAI_API_KEY` (only when no key is configured)
    /// - `OPENAI_ORG_ID`
    /// - `RAGCHAT_MODEL`, `ENCODING`
    /// - `PINECONE_API_KEY`, `PINECONE_INDEX`, `PINECONE_INDEX_HOST`, `PINECONE_NAMESPACE`
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("RAGCHAT_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }

        if let Some(org) = var("OPENAI_ORG_ID") {
            self.providers
                .entry(self.default_provider.clone())
                .or_default()
                .organization = Some(org);
        }

        if let Some(model) = var("RAGCHAT_MODEL") {
            self.model = model;
        }

        if let Some(encoding) = var("ENCODING") {
            self.encoding = encoding;
        }

        let retrieval = &mut self.retrieval;
        if let Some(key) = var("PINECONE_API_KEY") {
            retrieval.api_key = Some(key);
        }
        if let Some(index) = var("PINECONE_INDEX") {
            retrieval.index = Some(index);
        }
        if let Some(host) = var("PINECONE_INDEX_HOST") {
            retrieval.index_host = Some(host);
        }
        if let Some(namespace) = var("PINECONE_NAMESPACE") {
            retrieval.namespace = Some(namespace);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragchat")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.budget.max_total_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "budget.max_total_tokens must be > 0".into(),
            ));
        }

        if self.retrieval.num_relevant_docs == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.num_relevant_docs must be > 0".into(),
            ));
        }

        if !["pinecone", "memory", "none"].contains(&self.retrieval.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown retrieval.backend '{}' (expected pinecone, memory or none)",
                self.retrieval.backend
            )));
        }

        if self.stream.max_concurrent_streams == 0 {
            return Err(ConfigError::ValidationError(
                "stream.max_concurrent_streams must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// A copy with every secret replaced, safe to print.
    pub fn redacted(&self) -> Self {
        let mask = |s: &Option<String>| s.as_ref().map(|_| "[REDACTED]".to_string());

        let mut config = self.clone();
        config.api_key = mask(&self.api_key);
        config.retrieval.api_key = mask(&self.retrieval.api_key);
        for provider in config.providers.values_mut() {
            provider.api_key = mask(&provider.api_key);
        }
        config
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            model: default_model(),
            encoding: default_encoding(),
            temperature: default_temperature(),
            max_response_tokens: None,
            system_instruction: default_system_instruction(),
            budget: BudgetConfig::default(),
            retrieval: RetrievalConfig::default(),
            stream: StreamConfig::default(),
            gateway: GatewayConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.budget.tokens_per_message, 4);
        assert_eq!(config.retrieval.on_failure, RetrievalFailurePolicy::Degrade);
        assert_eq!(config.retrieval.ranking, MemoryRanking::Keyword);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.budget.max_total_tokens, config.budget.max_total_tokens);
    }

    #[test]
    fn redacted_copy_masks_every_secret() {
        let mut config = AppConfig {
            api_key: Some("sk-root".into()),
            ..AppConfig::default()
        };
        config.retrieval.api_key = Some("pc-key".into());
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-provider".into()),
                ..ProviderConfig::default()
            },
        );

        let printed = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(!printed.contains("sk-root"));
        assert!(!printed.contains("pc-key"));
        assert!(!printed.contains("sk-provider"));
        assert!(printed.contains("[REDACTED]"));
        assert_eq!(config.api_key.as_deref(), Some("sk-root"));
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.retrieval.backend = "faiss".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("faiss"));
    }

    #[test]
    fn zero_stream_cap_rejected() {
        let mut config = AppConfig::default();
        config.stream.max_concurrent_streams = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model, "gpt-3.5-turbo");
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
model = "gpt-4o"

[budget]
max_total_tokens = 1200

[retrieval]
backend = "memory"
on_failure = "abort"
num_relevant_followup_docs = 2
ranking = "embedding"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.budget.max_total_tokens, 1200);
        assert_eq!(config.budget.tokens_per_message, 4);
        assert_eq!(config.retrieval.backend, "memory");
        assert_eq!(config.retrieval.on_failure, RetrievalFailurePolicy::Abort);
        assert_eq!(config.retrieval.num_relevant_followup_docs, 2);
        assert_eq!(config.retrieval.ranking, MemoryRanking::Embedding);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model = [unclosed").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_ORG_ID", "org-1"),
            ("PINECONE_NAMESPACE", "twitter-algorithm"),
            ("ENCODING", "p50k_base"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(
            config.providers["openai"].organization.as_deref(),
            Some("org-1")
        );
        assert_eq!(config.retrieval.namespace.as_deref(), Some("twitter-algorithm"));
        assert_eq!(config.encoding, "p50k_base");
    }

    #[test]
    fn configured_api_key_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|k| (k == "OPENAI_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        config.retrieval.api_key = Some("pc-secret".into());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("pc-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-3.5-turbo"));
        assert!(toml_str.contains("max_total_tokens"));
    }
}
