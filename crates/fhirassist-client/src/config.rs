use fhirassist_core::{FhirAssistError, FhirAssistResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection and behavior settings for the assistant chat client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Origin of the admin API, e.g. `https://admin.example.org`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Model to request. The backend picks its default when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Use the streaming endpoint. When off, every turn is a single request.
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    /// Maximum silence on an open stream before the turn fails.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    /// Timeout of the availability probe.
    #[serde(default = "default_availability_timeout_secs")]
    pub availability_timeout_secs: u64,
    /// Timeout of non-streaming chat and summarization requests.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Final answers shorter than this (tool notifications removed, trimmed)
    /// are replaced with a fallback explanation.
    #[serde(default = "default_min_answer_chars")]
    pub min_answer_chars: usize,
    /// Content throttling.
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Conversation-length limits.
    #[serde(default)]
    pub budget: BudgetConfig,
    /// Endpoint paths.
    #[serde(default)]
    pub endpoints: EndpointConfig,
}

/// Render throttling for streamed content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Propagate content to the buffer every Nth `content` event.
    #[serde(default = "default_every_n_chunks")]
    pub every_n_chunks: u32,
    /// Propagate immediately when a single chunk is longer than this many characters.
    #[serde(default = "default_immediate_len")]
    pub immediate_len: usize,
}

/// Conversation-length limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Estimated token count above which older turns are summarized.
    #[serde(default = "default_max_conversation_tokens")]
    pub max_conversation_tokens: usize,
    /// Number of most recent messages kept verbatim when summarizing.
    #[serde(default = "default_keep_recent_messages")]
    pub keep_recent_messages: usize,
    /// Characters per token used by the default estimator.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

/// Endpoint paths, relative to `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Streaming chat endpoint.
    #[serde(default = "default_stream_path")]
    pub stream: String,
    /// Non-streaming chat endpoint.
    #[serde(default = "default_chat_path")]
    pub chat: String,
    /// Summarization endpoint.
    #[serde(default = "default_summarize_path")]
    pub summarize: String,
    /// Probed with `HEAD` to decide whether the assistant is reachable.
    #[serde(default = "default_chat_path")]
    pub health: String,
}

fn default_base_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_streaming() -> bool {
    true
}

fn default_stream_idle_timeout_secs() -> u64 {
    60
}

fn default_availability_timeout_secs() -> u64 {
    2
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_min_answer_chars() -> usize {
    10
}

fn default_every_n_chunks() -> u32 {
    3
}

fn default_immediate_len() -> usize {
    20
}

fn default_max_conversation_tokens() -> usize {
    12_000
}

fn default_keep_recent_messages() -> usize {
    4
}

fn default_chars_per_token() -> usize {
    4
}

fn default_stream_path() -> String {
    "/admin/ai/chat/stream".to_string()
}

fn default_chat_path() -> String {
    "/admin/ai/chat".to_string()
}

fn default_summarize_path() -> String {
    "/admin/ai/chat/summarize".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: None,
            model: None,
            streaming: default_streaming(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            availability_timeout_secs: default_availability_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            min_answer_chars: default_min_answer_chars(),
            throttle: ThrottleConfig::default(),
            budget: BudgetConfig::default(),
            endpoints: EndpointConfig::default(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            every_n_chunks: default_every_n_chunks(),
            immediate_len: default_immediate_len(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_conversation_tokens: default_max_conversation_tokens(),
            keep_recent_messages: default_keep_recent_messages(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            stream: default_stream_path(),
            chat: default_chat_path(),
            summarize: default_summarize_path(),
            health: default_chat_path(),
        }
    }
}

impl ClientConfig {
    /// Absolute URL for an endpoint path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Longest silence tolerated while opening or reading the stream.
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    /// Limit for the availability probe.
    pub fn availability_timeout(&self) -> Duration {
        Duration::from_secs(self.availability_timeout_secs)
    }

    /// Limit for non-streaming requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Rejects settings that would make the controller misbehave.
    pub fn validate(&self) -> FhirAssistResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(FhirAssistError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.throttle.every_n_chunks == 0 {
            return Err(FhirAssistError::Config(
                "throttle.every_n_chunks must be at least 1".into(),
            ));
        }
        if self.budget.chars_per_token == 0 {
            return Err(FhirAssistError::Config(
                "budget.chars_per_token must be at least 1".into(),
            ));
        }
        if self.stream_idle_timeout_secs == 0 {
            return Err(FhirAssistError::Config(
                "stream_idle_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
