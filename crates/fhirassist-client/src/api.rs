use crate::sse::ByteStream;
use crate::stream::DonePayload;
use async_trait::async_trait;
use fhirassist_core::{DocumentChunk, FhirAssistResult, Message, TokenUsage, ToolsUsed};
use serde::{Deserialize, Serialize};

/// Body of a chat request, streaming or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// User text of this turn.
    pub message: String,
    /// Server-assigned id from an earlier `done` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Model override, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A `{role, content}` pair as the summarization endpoint expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    /// `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl From<&Message> for ApiMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.api_name().to_string(),
            content: message.content.clone(),
        }
    }
}

/// Body of a summarization request: the server condenses everything except
/// the last `keep_recent_count` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeRequest {
    /// The whole conversation, oldest first.
    pub messages: Vec<ApiMessage>,
    /// Messages at the end left out of the summary.
    pub keep_recent_count: usize,
}

/// A complete (non-streaming) answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// Answer text. Summarization responses may call it `content` or `summary`.
    #[serde(alias = "content", alias = "summary")]
    pub answer: String,
    /// Retrieval citations.
    #[serde(default)]
    pub sources: Vec<DocumentChunk>,
    /// Model that produced the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tools the backend ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<ToolsUsed>,
    /// Token accounting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<TokenUsage>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<f64>,
    /// Server-assigned conversation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Server timestamp, passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ChatResponse {
    /// The completion metadata, shaped like a `done` event.
    pub fn metadata(&self) -> DonePayload {
        DonePayload {
            model: self.model.clone(),
            tools_used: self.tools_used.clone(),
            tokens_used: self.tokens_used.clone(),
            total_duration: self.total_duration,
            conversation_id: self.conversation_id.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

/// The assistant backend as seen by the session controller.
///
/// [`HttpChatApi`](crate::http::HttpChatApi) talks to the real admin API;
/// tests substitute scripted implementations.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Whether the assistant endpoint is reachable. Implementations may cache.
    async fn is_available(&self) -> bool {
        true
    }

    /// Drops any cached availability verdict and probes again.
    async fn retry_connection(&self) -> bool {
        self.is_available().await
    }

    /// Opens the event stream for one turn.
    ///
    /// The returned body must already enforce the idle timeout; the decoder
    /// consumes it as-is.
    async fn open_stream(&self, request: &ChatRequest) -> FhirAssistResult<ByteStream>;

    /// Sends one turn and waits for the whole answer.
    async fn chat(&self, request: &ChatRequest) -> FhirAssistResult<ChatResponse>;

    /// Condenses the older part of a conversation.
    async fn summarize(&self, request: &SummarizeRequest) -> FhirAssistResult<ChatResponse>;
}
