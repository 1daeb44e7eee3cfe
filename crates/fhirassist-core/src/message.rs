use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human end-user.
    User,
    /// The AI assistant.
    Agent,
}

impl Role {
    /// The role name the assistant backend expects in `messages` payloads.
    pub fn api_name(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "assistant",
        }
    }
}

/// A citation chunk returned by the backend's retrieval step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    /// Chunk identifier.
    pub id: String,
    /// The cited text.
    #[serde(default)]
    pub content: String,
    /// Source document or file.
    #[serde(default)]
    pub source: String,
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Document category.
    #[serde(default)]
    pub category: String,
    /// Relevance score in `0..=1`, when the backend reports one.
    #[serde(default, alias = "relevance_score", skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

/// Token accounting reported when a turn completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens.
    #[serde(default, alias = "promptTokens")]
    pub input_tokens: u64,
    /// Completion tokens.
    #[serde(default, alias = "completionTokens")]
    pub output_tokens: u64,
    /// Reasoning tokens, for models that report them separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    /// Total tokens, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    /// Total tokens, falling back to the sum of the parts.
    pub fn total(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| {
            self.input_tokens + self.output_tokens + self.reasoning_tokens.unwrap_or(0)
        })
    }
}

/// Lifecycle status of a backend tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// The tool call was issued.
    Started,
    /// The tool call returned successfully.
    Completed,
    /// The tool call failed.
    Failed,
}

/// One tool execution reported by the backend in completion metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    /// Name of the tool that was called.
    pub tool_name: String,
    /// Backend identifier of this call.
    #[serde(default)]
    pub tool_call_id: String,
    /// Final status.
    pub status: ToolStatus,
    /// Execution time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Error message if the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tool usage as reported by the backend: some endpoints send the full
/// execution list, others only a count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolsUsed {
    /// Detailed execution records.
    Executions(Vec<ToolExecution>),
    /// Number of tools called.
    Count(u64),
}

impl ToolsUsed {
    /// Number of tool calls reported.
    pub fn count(&self) -> usize {
        match self {
            ToolsUsed::Executions(list) => list.len(),
            ToolsUsed::Count(n) => usize::try_from(*n).unwrap_or(usize::MAX),
        }
    }
}

/// A single chat message.
///
/// Agent messages start life as an empty placeholder with `streaming = true`
/// and are finalized exactly once when the turn ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier for this message.
    pub id: String,
    /// The role of the message author.
    pub role: Role,
    /// Message text. Append-only while `streaming` is set.
    pub content: String,
    /// UTC timestamp of when the message was created.
    pub created_at: DateTime<Utc>,
    /// Citations attached to an agent answer.
    #[serde(default)]
    pub sources: Vec<DocumentChunk>,
    /// Whether the message is still receiving content.
    #[serde(default)]
    pub streaming: bool,
    /// Tool names invoked while producing this message, in call order.
    #[serde(default)]
    pub tool_calls: Vec<String>,
    /// Model that produced the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Token accounting for the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<TokenUsage>,
    /// Wall-clock duration of the turn as measured by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<f64>,
    /// Tool executions reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<ToolsUsed>,
}

impl Message {
    /// Creates a finalized message with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            sources: Vec::new(),
            streaming: false,
            tool_calls: Vec::new(),
            model: None,
            tokens_used: None,
            total_duration_ms: None,
            tools_used: None,
        }
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a finalized message with [`Role::Agent`].
    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content)
    }

    /// Creates the empty, streaming agent message that a turn fills in.
    pub fn placeholder() -> Self {
        Self {
            streaming: true,
            ..Self::new(Role::Agent, String::new())
        }
    }

    /// Whether this is an agent message.
    pub fn is_agent(&self) -> bool {
        self.role == Role::Agent
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_empty_streaming_agent() {
        let msg = Message::placeholder();
        assert_eq!(msg.role, Role::Agent);
        assert!(msg.streaming);
        assert!(msg.content.is_empty());
        assert!(msg.sources.is_empty());
    }

    #[test]
    fn message_ids_are_unique() {
        let a = Message::user("a");
        let b = Message::user("a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn message_serializes_camel_case() {
        let mut msg = Message::agent("hi");
        msg.total_duration_ms = Some(12.0);
        msg.tool_calls.push("list_users".into());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "agent");
        assert_eq!(json["toolCalls"][0], "list_users");
        assert_eq!(json["totalDurationMs"], 12.0);
        assert!(json.get("createdAt").is_some());
        assert!(json.get("model").is_none());
    }

    #[test]
    fn document_chunk_accepts_snake_case_score() {
        let chunk: DocumentChunk = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "content": "text",
            "source": "docs/smart.md",
            "title": "SMART",
            "category": "guide",
            "relevance_score": 0.8
        }))
        .unwrap();
        assert_eq!(chunk.relevance_score, Some(0.8));
    }

    #[test]
    fn tools_used_accepts_list_or_count() {
        let list: ToolsUsed = serde_json::from_value(serde_json::json!([
            {"toolName": "list_users", "toolCallId": "t1", "status": "completed"}
        ]))
        .unwrap();
        assert_eq!(list.count(), 1);

        let count: ToolsUsed = serde_json::from_value(serde_json::json!(3)).unwrap();
        assert_eq!(count, ToolsUsed::Count(3));
    }

    #[test]
    fn token_usage_total_falls_back_to_sum() {
        let usage: TokenUsage = serde_json::from_value(serde_json::json!({
            "promptTokens": 10,
            "completionTokens": 5,
            "reasoningTokens": 2
        }))
        .unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.total(), 17);
    }

    #[test]
    fn role_api_names() {
        assert_eq!(Role::User.api_name(), "user");
        assert_eq!(Role::Agent.api_name(), "assistant");
    }
}
