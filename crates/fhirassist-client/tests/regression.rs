//! Regression tests for the session controller: throttling, answer validation,
//! fallback, failure mapping, summarization and turn cleanup.

use async_trait::async_trait;
use fhirassist_client::notices;
use fhirassist_client::{
    BudgetConfig, ByteStream, ChatApi, ChatRequest, ChatResponse, ClientConfig, SessionController,
    SummarizeRequest, TurnObserver, TurnState, TurnUpdate,
};
use fhirassist_core::{FhirAssistError, FhirAssistResult, Message, Role};
use fhirassist_session::{ConversationBuffer, ConversationStore, FileConversationStore};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Test doubles ---

#[derive(Default)]
struct ScriptedApi {
    body: Vec<String>,
    fail_open: Option<fn() -> FhirAssistError>,
    fail_body: Option<fn() -> FhirAssistError>,
    hang: bool,
    answer: Option<String>,
    summary: Option<String>,
    unavailable: bool,
    retry_succeeds: bool,
    calls: Mutex<Vec<&'static str>>,
    requests: Mutex<Vec<ChatRequest>>,
    summarize_requests: Mutex<Vec<SummarizeRequest>>,
    chat_calls: AtomicUsize,
}

impl ScriptedApi {
    fn streaming(events: &[Value]) -> Self {
        Self {
            body: events.iter().map(|e| format!("data: {e}\n\n")).collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatApi for ScriptedApi {
    async fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn retry_connection(&self) -> bool {
        self.calls.lock().push("retry_connection");
        self.retry_succeeds
    }

    async fn open_stream(&self, request: &ChatRequest) -> FhirAssistResult<ByteStream> {
        self.calls.lock().push("open_stream");
        self.requests.lock().push(request.clone());
        if let Some(make) = self.fail_open {
            return Err(make());
        }
        let mut chunks: Vec<FhirAssistResult<Vec<u8>>> = self
            .body
            .iter()
            .map(|chunk| Ok(chunk.as_bytes().to_vec()))
            .collect();
        if let Some(make) = self.fail_body {
            chunks.push(Err(make()));
        }
        let stream = futures_util::stream::iter(chunks);
        if self.hang {
            Ok(stream.chain(futures_util::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }

    async fn chat(&self, request: &ChatRequest) -> FhirAssistResult<ChatResponse> {
        self.calls.lock().push("chat");
        self.requests.lock().push(request.clone());
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Some(answer) => Ok(ChatResponse {
                answer: answer.clone(),
                model: Some("gpt-4o-mini".into()),
                ..ChatResponse::default()
            }),
            None => Err(FhirAssistError::Http("HTTP 500: no answer".into())),
        }
    }

    async fn summarize(&self, request: &SummarizeRequest) -> FhirAssistResult<ChatResponse> {
        self.calls.lock().push("summarize");
        self.summarize_requests.lock().push(request.clone());
        match &self.summary {
            Some(summary) => Ok(ChatResponse {
                answer: summary.clone(),
                ..ChatResponse::default()
            }),
            None => Err(FhirAssistError::Http("HTTP 502: summarizer down".into())),
        }
    }
}

#[derive(Default)]
struct RecordingObserver {
    updates: Mutex<Vec<TurnUpdate>>,
}

impl RecordingObserver {
    fn flushed_contents(&self) -> Vec<String> {
        self.updates
            .lock()
            .iter()
            .filter_map(|u| match u {
                TurnUpdate::Flushed(m) => Some(m.content.clone()),
                _ => None,
            })
            .collect()
    }

    fn states(&self) -> Vec<TurnState> {
        self.updates
            .lock()
            .iter()
            .filter_map(|u| match u {
                TurnUpdate::State(s) => Some(*s),
                _ => None,
            })
            .collect()
    }
}

impl TurnObserver for RecordingObserver {
    fn on_update(&self, update: &TurnUpdate) {
        self.updates.lock().push(update.clone());
    }
}

fn setup_with(
    api: ScriptedApi,
    config: ClientConfig,
) -> (SessionController, Arc<ScriptedApi>, Arc<RecordingObserver>) {
    let api = Arc::new(api);
    let observer = Arc::new(RecordingObserver::default());
    let controller = SessionController::new(config, api.clone(), ConversationBuffer::default())
        .with_observer(observer.clone());
    (controller, api, observer)
}

fn setup(api: ScriptedApi) -> (SessionController, Arc<ScriptedApi>, Arc<RecordingObserver>) {
    setup_with(api, ClientConfig::default())
}

fn content(text: &str) -> Value {
    json!({"type": "content", "content": text})
}

fn last_message(controller: &SessionController) -> Message {
    controller.buffer().messages().pop().unwrap()
}

// --- Happy path ---

#[tokio::test]
async fn test_hi_there_example() {
    let api = ScriptedApi::streaming(&[
        content("Hi"),
        content(" there"),
        json!({"type": "done", "model": "gpt-4o"}),
    ]);
    let config = ClientConfig {
        min_answer_chars: 0,
        ..ClientConfig::default()
    };
    let (mut controller, _, _) = setup_with(api, config);

    let message = controller.send("hello").await.unwrap();
    assert_eq!(message.content, "Hi there");
    assert_eq!(message.model.as_deref(), Some("gpt-4o"));
    assert!(!message.streaming);
    assert_eq!(last_message(&controller), message);
    assert_eq!(controller.state(), TurnState::Idle);
    assert!(!controller.is_processing());
}

#[tokio::test]
async fn test_short_answer_is_replaced_at_default_threshold() {
    let api = ScriptedApi::streaming(&[
        content("Hi"),
        content(" there"),
        json!({"type": "done", "model": "gpt-4o"}),
    ]);
    let (mut controller, _, _) = setup(api);

    let message = controller.send("hello").await.unwrap();
    assert_eq!(message.content, notices::EMPTY_ANSWER);
    assert_eq!(message.model.as_deref(), Some("gpt-4o"));
}

#[tokio::test]
async fn test_done_metadata_is_recorded() {
    let api = ScriptedApi::streaming(&[
        content("There are three SMART apps registered."),
        json!({
            "type": "done",
            "model": "gpt-4o",
            "toolsUsed": 1,
            "tokensUsed": {"inputTokens": 120, "outputTokens": 30, "reasoningTokens": 8},
            "totalDuration": 1830,
            "conversationId": "conv-42"
        }),
    ]);
    let (mut controller, _, _) = setup(api);

    let message = controller.send("How many apps?").await.unwrap();
    let usage = message.tokens_used.clone().unwrap();
    assert_eq!(usage.input_tokens, 120);
    assert_eq!(usage.reasoning_tokens, Some(8));
    assert_eq!(message.total_duration_ms, Some(1830.0));
    assert_eq!(message.tools_used.as_ref().map(|t| t.count()), Some(1));
    assert_eq!(controller.buffer().conversation_id().as_deref(), Some("conv-42"));
}

#[tokio::test]
async fn test_conversation_id_is_sent_on_next_turn() {
    let api = ScriptedApi::streaming(&[
        content("A sufficiently long answer."),
        json!({"type": "done", "conversationId": "conv-7"}),
    ]);
    let (mut controller, api, _) = setup(api);

    controller.send("first").await.unwrap();
    controller.send("second").await.unwrap();

    let requests = api.requests.lock().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].conversation_id, None);
    assert_eq!(requests[1].conversation_id.as_deref(), Some("conv-7"));
    assert_eq!(requests[1].message, "second");
}

#[tokio::test]
async fn test_model_is_added_to_requests() {
    let api = ScriptedApi::streaming(&[content("A sufficiently long answer.")]);
    let config = ClientConfig {
        model: Some("gpt-5-mini".into()),
        ..ClientConfig::default()
    };
    let (mut controller, api, _) = setup_with(api, config);

    controller.send("hi").await.unwrap();
    assert_eq!(api.requests.lock()[0].model.as_deref(), Some("gpt-5-mini"));
}

#[tokio::test]
async fn test_state_path_for_streamed_turn() {
    let api = ScriptedApi::streaming(&[
        content("A sufficiently long answer."),
        json!({"type": "done"}),
    ]);
    let (mut controller, _, observer) = setup(api);

    controller.send("hi").await.unwrap();
    assert_eq!(
        observer.states(),
        vec![
            TurnState::AwaitingFirstByte,
            TurnState::Streaming,
            TurnState::Finalizing,
            TurnState::Idle,
        ]
    );
}

// --- Throttling ---

#[tokio::test]
async fn test_throttle_flushes_every_third_chunk_then_remainder() {
    let events: Vec<Value> = (0..10).map(|_| content("ab")).collect();
    let (mut controller, _, observer) = setup(ScriptedApi::streaming(&events));

    let message = controller.send("count").await.unwrap();

    let lengths: Vec<usize> = observer
        .flushed_contents()
        .iter()
        .map(|c| c.len())
        .collect();
    // Chunks 3, 6, 9, then the pending tenth at end of stream.
    assert_eq!(lengths, vec![6, 12, 18, 20]);
    assert_eq!(message.content, "ab".repeat(10));
    assert!(!message.streaming);
}

#[tokio::test]
async fn test_no_remainder_flush_when_counter_is_empty() {
    let events: Vec<Value> = (0..6).map(|_| content("abcd")).collect();
    let (mut controller, _, observer) = setup(ScriptedApi::streaming(&events));

    let message = controller.send("count").await.unwrap();
    assert_eq!(observer.flushed_contents().len(), 2);
    assert_eq!(message.content, "abcd".repeat(6));
}

#[tokio::test]
async fn test_long_chunk_flushes_immediately() {
    let long = "x".repeat(25);
    let (mut controller, _, observer) = setup(ScriptedApi::streaming(&[
        content("a"),
        content(&long),
        json!({"type": "done"}),
    ]));

    controller.send("hi").await.unwrap();
    assert_eq!(observer.flushed_contents(), vec![format!("a{long}")]);
}

#[tokio::test]
async fn test_empty_content_chunks_are_skipped() {
    let (mut controller, _, observer) = setup(ScriptedApi::streaming(&[
        content(""),
        content(""),
        content("Hello there"),
        json!({"type": "done"}),
    ]));

    let message = controller.send("hi").await.unwrap();
    // Counted empties would have flushed on the third chunk.
    assert!(observer.flushed_contents().is_empty());
    assert_eq!(message.content, "Hello there");
}

#[tokio::test]
async fn test_tool_notification_flushes_immediately() {
    let (mut controller, _, observer) = setup(ScriptedApi::streaming(&[
        content("a"),
        json!({"type": "function_calling", "name": "list_smart_apps"}),
        content("You have 3 SMART apps."),
        json!({"type": "done"}),
    ]));

    let message = controller.send("apps?").await.unwrap();
    let flushed = observer.flushed_contents();
    assert_eq!(flushed[0], format!("a{}", notices::tool_notification("list_smart_apps")));
    assert!(flushed[0].contains("🔧 **Executing: List Smart Apps**"));
    assert_eq!(message.tool_calls, vec!["list_smart_apps".to_string()]);
    assert!(message.content.ends_with("You have 3 SMART apps."));
}

#[tokio::test]
async fn test_tool_notification_restarts_chunk_count() {
    let (mut controller, _, observer) = setup(ScriptedApi::streaming(&[
        content("a"),
        json!({"type": "function_calling", "name": "list_users"}),
        content("b"),
        content("c"),
        json!({"type": "done"}),
    ]));

    controller.send("users?").await.unwrap();
    // Only the notification flushed; "b" and "c" start a fresh count of two.
    let flushed = observer.flushed_contents();
    assert_eq!(flushed.len(), 1);
    assert!(flushed[0].ends_with(&notices::tool_notification("list_users")));
}

// --- Answer validation ---

#[tokio::test]
async fn test_empty_answer_without_tools_gets_generic_fallback() {
    let (mut controller, _, _) = setup(ScriptedApi::streaming(&[
        content("  ok  "),
        json!({"type": "done"}),
    ]));

    let message = controller.send("hi").await.unwrap();
    assert_eq!(message.content, notices::EMPTY_ANSWER);
}

#[tokio::test]
async fn test_empty_answer_with_tools_lists_them() {
    let (mut controller, _, _) = setup(ScriptedApi::streaming(&[
        json!({"type": "function_calling", "name": "list_smart_apps"}),
        json!({"type": "function_calling", "name": "get_fhir_servers"}),
        json!({"type": "done"}),
    ]));

    let message = controller.send("inventory").await.unwrap();
    assert!(message
        .content
        .contains("I called the following functions: **list smart apps, get fhir servers**"));
    assert!(message.content.ends_with(notices::TOOLS_WITHOUT_ANSWER));
    assert!(message.content.contains("Executing: Get Fhir Servers"));
}

#[tokio::test]
async fn test_implicit_completion_validates_content() {
    let (mut controller, _, _) = setup(ScriptedApi::streaming(&[content("ok")]));

    let message = controller.send("hi").await.unwrap();
    assert_eq!(message.content, notices::EMPTY_ANSWER);
    assert!(!message.streaming);
}

#[tokio::test]
async fn test_stream_without_events_still_finalizes() {
    let (mut controller, _, _) = setup(ScriptedApi::streaming(&[]));

    let message = controller.send("hi").await.unwrap();
    assert!(!message.streaming);
    assert_eq!(message.content, notices::EMPTY_ANSWER);
    assert!(controller.buffer().streaming_message().is_none());
}

// --- Events ---

#[tokio::test]
async fn test_sources_last_write_wins() {
    let (mut controller, _, _) = setup(ScriptedApi::streaming(&[
        json!({"type": "sources", "sources": [{"id": "a", "title": "First"}]}),
        json!({"type": "sources", "sources": [{"id": "b", "title": "Second", "relevanceScore": 0.9}]}),
        content("Grounded answer with citations."),
        json!({"type": "done"}),
    ]));

    let message = controller.send("docs?").await.unwrap();
    assert_eq!(message.sources.len(), 1);
    assert_eq!(message.sources[0].title, "Second");
    assert_eq!(message.sources[0].relevance_score, Some(0.9));
}

#[tokio::test]
async fn test_reasoning_stays_out_of_content() {
    let (mut controller, _, observer) = setup(ScriptedApi::streaming(&[
        json!({"type": "reasoning", "content": "Looking up "}),
        json!({"type": "reasoning", "content": "the apps"}),
        json!({"type": "reasoning_done"}),
        content("Here is what I found in the registry."),
        json!({"type": "done"}),
    ]));

    let message = controller.send("apps?").await.unwrap();
    assert!(!message.content.contains("Looking up"));
    assert!(controller.reasoning().is_empty());

    let updates = observer.updates.lock().clone();
    assert!(updates.contains(&TurnUpdate::Reasoning {
        text: "Looking up the apps".into()
    }));
    assert!(updates.contains(&TurnUpdate::ReasoningDone));
}

#[tokio::test]
async fn test_ui_stream_frames_drive_the_turn() {
    let (mut controller, _, _) = setup(ScriptedApi::streaming(&[
        json!({"type": "start"}),
        json!({"type": "text-delta", "id": "0", "delta": "Three apps are "}),
        json!({"type": "text-delta", "id": "0", "delta": "registered."}),
        json!({"type": "finish", "model": "gpt-5-mini"}),
    ]));

    let message = controller.send("apps?").await.unwrap();
    assert_eq!(message.content, "Three apps are registered.");
    assert_eq!(message.model.as_deref(), Some("gpt-5-mini"));
}

#[tokio::test]
async fn test_malformed_line_does_not_abort_turn() {
    let api = ScriptedApi {
        body: vec![
            "data: {\"type\":\"content\",\"content\":\"Before the glitch, \"}\n\n".into(),
            "data: {broken\n\n".into(),
            "data: {\"type\":\"content\",\"content\":\"after it.\"}\n\n".into(),
            "data: {\"type\":\"done\"}\n\n".into(),
        ],
        ..ScriptedApi::default()
    };
    let (mut controller, _, _) = setup(api);

    let message = controller.send("hi").await.unwrap();
    assert_eq!(message.content, "Before the glitch, after it.");
}

// --- Errors and fallback ---

#[tokio::test]
async fn test_soft_error_falls_back_exactly_once() {
    let api = ScriptedApi {
        answer: Some("Here are the apps from the fallback path.".into()),
        ..ScriptedApi::streaming(&[
            content("partial"),
            json!({"type": "error", "error": "Streaming temporarily unavailable"}),
            content("never applied"),
        ])
    };
    let (mut controller, api, observer) = setup(api);

    let message = controller.send("apps?").await.unwrap();
    assert_eq!(api.chat_calls.load(Ordering::SeqCst), 1);
    assert_eq!(api.calls(), vec!["open_stream", "chat"]);
    assert_eq!(message.content, "Here are the apps from the fallback path.");
    assert_eq!(message.model.as_deref(), Some("gpt-4o-mini"));
    assert!(!message.streaming);

    let states = observer.states();
    let fallback = states
        .iter()
        .position(|s| *s == TurnState::FallbackRequested)
        .unwrap();
    assert_eq!(states[fallback + 1], TurnState::NonStreamingInFlight);
}

#[tokio::test]
async fn test_short_fallback_answer_is_kept_verbatim() {
    let api = ScriptedApi {
        answer: Some("Yes, 3.".into()),
        ..ScriptedApi::streaming(&[json!({"type": "error", "error": "Streaming temporarily unavailable"})])
    };
    let (mut controller, api, _) = setup(api);

    let message = controller.send("Are there three apps?").await.unwrap();
    assert_eq!(api.chat_calls.load(Ordering::SeqCst), 1);
    assert_eq!(message.content, "Yes, 3.");
    assert!(!message.streaming);
}

#[tokio::test]
async fn test_not_supported_error_also_falls_back() {
    let api = ScriptedApi {
        answer: Some("Answer delivered without streaming.".into()),
        ..ScriptedApi::streaming(&[json!({"type": "error", "error": "streaming not supported for this model"})])
    };
    let (mut controller, api, _) = setup(api);

    controller.send("hi").await.unwrap();
    assert_eq!(api.chat_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hard_error_is_terminal_without_fallback() {
    let api = ScriptedApi {
        answer: Some("should not be used".into()),
        ..ScriptedApi::streaming(&[
            content("partial"),
            json!({"type": "error", "error": "Rate limit exceeded"}),
        ])
    };
    let (mut controller, api, _) = setup(api);

    let message = controller.send("hi").await.unwrap();
    assert_eq!(api.chat_calls.load(Ordering::SeqCst), 0);
    assert_eq!(message.content, "⚠️ Rate limit exceeded");
    assert!(!message.streaming);
}

#[tokio::test]
async fn test_soft_error_match_is_case_sensitive() {
    let (mut controller, api, _) = setup(ScriptedApi::streaming(&[json!({
        "type": "error",
        "error": "Temporarily Unavailable"
    })]));

    let message = controller.send("hi").await.unwrap();
    assert_eq!(api.chat_calls.load(Ordering::SeqCst), 0);
    assert_eq!(message.content, "⚠️ Temporarily Unavailable");
}

#[tokio::test]
async fn test_failed_fallback_maps_to_generic_notice() {
    let (mut controller, _, _) = setup(ScriptedApi::streaming(&[json!({
        "type": "error",
        "error": "Streaming temporarily unavailable"
    })]));

    let message = controller.send("hi").await.unwrap();
    assert_eq!(message.content, notices::warning(notices::GENERIC_FAILURE));
}

#[tokio::test]
async fn test_timeout_maps_to_timeout_notice() {
    let api = ScriptedApi {
        fail_open: Some(|| FhirAssistError::Timeout("no data received for 60s".into())),
        ..ScriptedApi::default()
    };
    let (mut controller, _, observer) = setup(api);

    let message = controller.send("hi").await.unwrap();
    assert_eq!(message.content, notices::warning(notices::TIMEOUT));
    assert!(observer.states().contains(&TurnState::Errored));
    assert!(!controller.is_processing());
}

#[tokio::test]
async fn test_connection_failure_maps_to_network_notice() {
    let api = ScriptedApi {
        fail_open: Some(|| FhirAssistError::Network("connection refused".into())),
        ..ScriptedApi::default()
    };
    let (mut controller, _, _) = setup(api);

    let message = controller.send("hi").await.unwrap();
    assert_eq!(message.content, notices::warning(notices::NETWORK));
}

#[tokio::test]
async fn test_mid_stream_failure_replaces_partial_content() {
    let api = ScriptedApi {
        fail_body: Some(|| FhirAssistError::Stream("connection reset by peer".into())),
        ..ScriptedApi::streaming(&[content("Partial answer that was cut")])
    };
    let (mut controller, _, _) = setup(api);

    let message = controller.send("hi").await.unwrap();
    assert_eq!(message.content, notices::warning(notices::GENERIC_FAILURE));
    assert!(!message.streaming);
}

#[tokio::test]
async fn test_unavailable_service_skips_the_stream() {
    let api = ScriptedApi {
        unavailable: true,
        ..ScriptedApi::default()
    };
    let (mut controller, api, _) = setup(api);

    let message = controller.send("hi").await.unwrap();
    assert_eq!(message.content, notices::UNAVAILABLE);
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_non_streaming_mode_uses_chat_endpoint() {
    let api = ScriptedApi {
        answer: Some("A complete answer in one response.".into()),
        ..ScriptedApi::default()
    };
    let config = ClientConfig {
        streaming: false,
        ..ClientConfig::default()
    };
    let (mut controller, api, observer) = setup_with(api, config);

    let message = controller.send("hi").await.unwrap();
    assert_eq!(api.calls(), vec!["chat"]);
    assert_eq!(message.content, "A complete answer in one response.");
    assert!(observer.states().contains(&TurnState::NonStreamingInFlight));
}

#[tokio::test]
async fn test_short_non_streaming_answer_is_kept_verbatim() {
    let api = ScriptedApi {
        answer: Some("No.".into()),
        ..ScriptedApi::default()
    };
    let config = ClientConfig {
        streaming: false,
        ..ClientConfig::default()
    };
    let (mut controller, _, _) = setup_with(api, config);

    let message = controller.send("Is the server down?").await.unwrap();
    assert_eq!(message.content, "No.");
}

// --- Summarization ---

fn long_history(buffer: &ConversationBuffer, count: usize) {
    for i in 0..count {
        let text = format!("{i}{}", "x".repeat(99));
        let message = if i % 2 == 0 {
            Message::user(text)
        } else {
            Message::agent(text)
        };
        buffer.push(message).unwrap();
    }
}

fn tight_budget() -> ClientConfig {
    ClientConfig {
        budget: BudgetConfig {
            max_conversation_tokens: 50,
            keep_recent_messages: 2,
            chars_per_token: 4,
        },
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_over_budget_summarizes_once_before_the_turn() {
    let api = ScriptedApi {
        summary: Some("The user asked about apps and servers.".into()),
        ..ScriptedApi::streaming(&[content("Latest answer goes here."), json!({"type": "done"})])
    };
    let (mut controller, api, observer) = setup_with(api, tight_budget());
    long_history(controller.buffer(), 6);

    controller.send("Next question").await.unwrap();

    assert_eq!(api.calls(), vec!["summarize", "open_stream"]);
    let request = api.summarize_requests.lock()[0].clone();
    assert_eq!(request.messages.len(), 7);
    assert_eq!(request.keep_recent_count, 2);

    let messages = controller.buffer().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, Role::Agent);
    assert!(messages[0]
        .content
        .starts_with(&format!("**{}**", notices::SUMMARY_HEADING)));
    assert!(messages[0].content.contains("The user asked about apps and servers."));
    assert!(messages[1].content.starts_with('5'));
    assert_eq!(messages[2].content, "Next question");
    assert!(observer
        .updates
        .lock()
        .contains(&TurnUpdate::Summarized { removed: 5 }));
}

#[tokio::test]
async fn test_summarization_failure_keeps_history_and_proceeds() {
    let api = ScriptedApi::streaming(&[content("Latest answer goes here."), json!({"type": "done"})]);
    let (mut controller, api, _) = setup_with(api, tight_budget());
    long_history(controller.buffer(), 6);
    let before = controller.buffer().messages();

    let message = controller.send("Next question").await.unwrap();

    assert_eq!(api.calls(), vec!["summarize", "open_stream"]);
    let after = controller.buffer().messages();
    assert_eq!(after.len(), 8);
    assert_eq!(&after[..6], &before[..]);
    assert_eq!(message.content, "Latest answer goes here.");
}

#[tokio::test]
async fn test_within_budget_does_not_summarize() {
    let api = ScriptedApi::streaming(&[content("Latest answer goes here.")]);
    let (mut controller, api, _) = setup(api);
    long_history(controller.buffer(), 6);

    controller.send("Next question").await.unwrap();
    assert_eq!(api.calls(), vec!["open_stream"]);
}

// --- Turn lifecycle ---

#[tokio::test]
async fn test_send_rejected_while_processing() {
    let (mut controller, api, _) = setup(ScriptedApi::streaming(&[content("unused")]));
    let processing = controller.processing();
    processing.store(true, Ordering::SeqCst);

    let err = controller.send("hi").await.unwrap_err();
    assert!(matches!(err, FhirAssistError::Busy(_)));
    assert!(api.calls().is_empty());
    assert!(controller.buffer().is_empty());
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let (mut controller, api, _) = setup(ScriptedApi::default());

    assert!(controller.send("   ").await.is_err());
    assert!(api.calls().is_empty());
    assert!(!controller.is_processing());
}

#[tokio::test]
async fn test_dropped_turn_finalizes_placeholder() {
    let api = ScriptedApi {
        hang: true,
        ..ScriptedApi::streaming(&[content("Partial")])
    };
    let (mut controller, _, _) = setup(api);

    let result = tokio::time::timeout(Duration::from_millis(50), controller.send("hi")).await;
    assert!(result.is_err());

    assert!(!controller.is_processing());
    assert_eq!(controller.state(), TurnState::Idle);
    assert!(controller.buffer().streaming_message().is_none());
    assert_eq!(last_message(&controller).content, notices::CANCELLED);
}

#[tokio::test]
async fn test_turn_is_persisted_after_finalization() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileConversationStore::new(dir.path().to_path_buf()).await.unwrap());
    let api = Arc::new(ScriptedApi::streaming(&[
        content("Persisted answer text."),
        json!({"type": "done", "conversationId": "conv-9"}),
    ]));
    let mut controller = SessionController::new(
        ClientConfig::default(),
        api,
        ConversationBuffer::new(Some("Welcome!".into())),
    )
    .with_store(store.clone(), "default");

    controller.send("hi").await.unwrap();

    let saved = store.load("default").await.unwrap().unwrap();
    assert_eq!(saved.messages.len(), 3);
    assert_eq!(saved.conversation_id.as_deref(), Some("conv-9"));
    assert!(saved.messages.iter().all(|m| !m.streaming));
}

#[tokio::test]
async fn test_reset_restores_greeting() {
    let api = Arc::new(ScriptedApi::streaming(&[
        content("Some answer to clear."),
        json!({"type": "done", "conversationId": "conv-1"}),
    ]));
    let mut controller = SessionController::new(
        ClientConfig::default(),
        api,
        ConversationBuffer::new(Some("Welcome!".into())),
    );

    controller.send("hi").await.unwrap();
    controller.reset().await.unwrap();

    let messages = controller.buffer().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Welcome!");
    assert!(controller.buffer().conversation_id().is_none());
}

#[tokio::test]
async fn test_retry_connection_reports_outcome() {
    let api = ScriptedApi {
        retry_succeeds: true,
        ..ScriptedApi::default()
    };
    let (mut controller, _, _) = setup(api);

    assert!(controller.retry_connection().await.unwrap());
    let notice = last_message(&controller);
    assert!(notice.content.starts_with(notices::SUCCESS_PREFIX));
    assert!(notice.content.contains(notices::CONNECTED));

    let (mut controller, _, _) = setup(ScriptedApi::default());
    assert!(!controller.retry_connection().await.unwrap());
    assert!(last_message(&controller).content.starts_with(notices::WARNING_PREFIX));
}

#[tokio::test]
async fn test_translator_localizes_notices() {
    use fhirassist_client::TableTranslator;
    use std::collections::HashMap;

    let translator = TableTranslator::new(HashMap::from([(
        notices::TIMEOUT.to_string(),
        "La solicitud tardó demasiado.".to_string(),
    )]));
    let api = ScriptedApi {
        fail_open: Some(|| FhirAssistError::Timeout("idle".into())),
        ..ScriptedApi::default()
    };
    let (controller, _, _) = setup(api);
    let mut controller = controller.with_translator(Arc::new(translator));

    let message = controller.send("hola").await.unwrap();
    assert_eq!(message.content, "⚠️ La solicitud tardó demasiado.");
}
