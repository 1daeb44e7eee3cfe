use fhirassist_core::{DocumentChunk, TokenUsage, ToolsUsed};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Typed events of the assistant's chat stream.
///
/// The canonical wire form is a JSON object tagged by `type`. Frames in the
/// AI SDK UI-stream vocabulary are mapped onto the same events by
/// [`StreamEvent::from_frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Retrieval citations for the answer. Replaces any earlier list.
    Sources { sources: Vec<DocumentChunk> },

    /// A fragment of the model's reasoning summary.
    Reasoning { content: String },

    /// The reasoning phase is over.
    ReasoningDone,

    /// The backend started executing a tool (snake_case identifier).
    FunctionCalling { name: String },

    /// A fragment of answer text.
    Content { content: String },

    /// The answer is complete.
    Done(DonePayload),

    /// The backend reported a failure.
    Error { error: String },
}

/// Completion metadata carried by a `done` event or a non-streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonePayload {
    /// Model that produced the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tools the backend ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<ToolsUsed>,
    /// Token accounting. Also read from `usage`.
    #[serde(default, alias = "usage", skip_serializing_if = "Option::is_none")]
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

const FINISH_TYPES: [&str; 5] = ["finish", "end", "message-end", "message-finish", "done"];
const TEXT_FIELDS: [&str; 5] = ["delta", "textDelta", "text", "data", "content"];
const DELTA_FIELDS: [&str; 3] = ["delta", "textDelta", "text"];

impl StreamEvent {
    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Sources { .. } => "sources",
            StreamEvent::Reasoning { .. } => "reasoning",
            StreamEvent::ReasoningDone => "reasoning_done",
            StreamEvent::FunctionCalling { .. } => "function_calling",
            StreamEvent::Content { .. } => "content",
            StreamEvent::Done(_) => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Interprets one decoded frame.
    ///
    /// A frame can yield several events: a `sources` array may ride along with
    /// another event, and a finish marker yields `reasoning_done` then `done`.
    pub fn from_frame(frame: &Value) -> Vec<StreamEvent> {
        if let Ok(event) = serde_json::from_value::<StreamEvent>(frame.clone()) {
            return vec![event];
        }
        match frame.as_object() {
            Some(obj) => normalize(obj),
            None => Vec::new(),
        }
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn normalize(obj: &Map<String, Value>) -> Vec<StreamEvent> {
    let kind = str_field(obj, "type").map(str::to_lowercase).unwrap_or_default();

    if kind == "error" || str_field(obj, "error").is_some() {
        let error = str_field(obj, "error").unwrap_or("An error occurred.");
        return vec![StreamEvent::Error {
            error: error.to_string(),
        }];
    }

    let mut events = Vec::new();

    if let Some(sources) = obj.get("sources").filter(|v| v.is_array()) {
        match serde_json::from_value::<Vec<DocumentChunk>>(sources.clone()) {
            Ok(sources) => events.push(StreamEvent::Sources { sources }),
            Err(e) => warn!(error = %e, "Ignoring malformed sources array"),
        }
    }

    let text = TEXT_FIELDS.iter().find_map(|key| str_field(obj, key));
    let has_delta = DELTA_FIELDS.iter().any(|key| str_field(obj, key).is_some());

    if kind.contains("reason") || kind.contains("think") {
        if kind.ends_with("done") || kind.ends_with("end") {
            events.push(StreamEvent::ReasoningDone);
            return events;
        }
        if let Some(text) = text {
            events.push(StreamEvent::Reasoning {
                content: text.to_string(),
            });
            return events;
        }
    }

    if (kind.contains("text") && kind.contains("delta")) || has_delta {
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::Content {
                content: text.to_string(),
            });
            return events;
        }
    }

    let tool_name = str_field(obj, "toolName")
        .or_else(|| str_field(obj, "name"))
        .or_else(|| obj.get("tool").and_then(|t| t.get("name")).and_then(Value::as_str));
    if kind.starts_with("tool") || kind == "function_calling" {
        if let Some(name) = tool_name {
            events.push(StreamEvent::FunctionCalling {
                name: name.to_string(),
            });
            return events;
        }
    }

    if FINISH_TYPES.contains(&kind.as_str()) {
        events.push(StreamEvent::ReasoningDone);
        events.push(StreamEvent::Done(lenient_done(obj)));
        return events;
    }

    if let Some(content) = str_field(obj, "content") {
        events.push(StreamEvent::Content {
            content: content.to_string(),
        });
        return events;
    }

    if events.is_empty() {
        debug!(kind = %kind, "Ignoring unrecognized stream frame");
    }
    events
}

/// Picks the metadata fields that parse and ignores the rest.
fn lenient_done(obj: &Map<String, Value>) -> DonePayload {
    let parse = |key: &str| obj.get(key).cloned();
    DonePayload {
        model: str_field(obj, "model").map(str::to_string),
        tools_used: parse("toolsUsed").and_then(|v| serde_json::from_value(v).ok()),
        tokens_used: ["usage", "tokensUsed"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(lenient_usage)),
        total_duration: obj.get("totalDuration").and_then(Value::as_f64),
        conversation_id: str_field(obj, "conversationId").map(str::to_string),
        timestamp: str_field(obj, "timestamp").map(str::to_string),
    }
}

/// Reads token counts field by field, first name wins.
fn lenient_usage(value: &Value) -> Option<TokenUsage> {
    let obj = value.as_object()?;
    let count = |keys: &[&str]| keys.iter().find_map(|key| obj.get(*key).and_then(Value::as_u64));
    let input = count(&["inputTokens", "promptTokens"]);
    let output = count(&["outputTokens", "completionTokens"]);
    let reasoning = count(&["reasoningTokens"]);
    let total = count(&["totalTokens"]);
    if input.is_none() && output.is_none() && reasoning.is_none() && total.is_none() {
        return None;
    }
    Some(TokenUsage {
        input_tokens: input.unwrap_or(0),
        output_tokens: output.unwrap_or(0),
        reasoning_tokens: reasoning,
        total_tokens: total,
    })
}
