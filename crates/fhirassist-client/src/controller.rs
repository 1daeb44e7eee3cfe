//! The per-conversation turn state machine.
//!
//! [`SessionController`] drives one turn at a time: it appends the user
//! message, keeps the conversation under budget, opens the event stream and
//! folds decoded events into the in-flight agent message. Content updates are
//! throttled; tool notifications, sources and the final write are not.
//!
//! Every failure ends as a visible agent message. The controller never leaves
//! a streaming message behind, even when the `send` future is dropped.

use crate::api::{ChatApi, ChatRequest};
use crate::budget::{SummaryOutcome, TokenBudget, TokenEstimator};
use crate::config::ClientConfig;
use crate::notices::{self, FailureCategory, IdentityTranslator, Translator};
use crate::sse::FrameStream;
use crate::stream::{DonePayload, StreamEvent};
use crate::throttle::UpdateThrottle;
use fhirassist_core::{DocumentChunk, FhirAssistError, FhirAssistResult, Message};
use fhirassist_session::{ConversationBuffer, ConversationStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where the current turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No turn in progress.
    Idle,
    /// Placeholder created, no event decoded yet.
    AwaitingFirstByte,
    /// Events are arriving.
    Streaming,
    /// A soft stream error asked for a whole-turn retry.
    FallbackRequested,
    /// Waiting on the non-streaming endpoint.
    NonStreamingInFlight,
    /// The turn failed; a notice is being written.
    Errored,
    /// Writing the final message.
    Finalizing,
}

/// Progress notifications delivered to a [`TurnObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// The turn moved to a new state.
    State(TurnState),
    /// The reasoning scratch text so far.
    Reasoning { text: String },
    /// The reasoning phase ended.
    ReasoningDone,
    /// Older messages were summarized before the turn.
    Summarized { removed: usize },
    /// The in-flight message after a content, tool or sources write.
    Flushed(Message),
    /// The message after its final write.
    Finalized(Message),
}

/// Receives turn progress, typically to re-render a view.
///
/// Called synchronously from the controller; implementations should return
/// quickly.
pub trait TurnObserver: Send + Sync {
    /// Handles one update.
    fn on_update(&self, update: &TurnUpdate);
}

/// Ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TurnObserver for NoopObserver {
    fn on_update(&self, _update: &TurnUpdate) {}
}

/// The agent message of the turn being processed.
struct Turn {
    id: String,
    content: String,
    sources: Vec<DocumentChunk>,
    tool_calls: Vec<String>,
    throttle: UpdateThrottle,
}

impl Turn {
    fn new(id: String, throttle: UpdateThrottle) -> Self {
        Self {
            id,
            content: String::new(),
            sources: Vec::new(),
            tool_calls: Vec::new(),
            throttle,
        }
    }
}

enum Flow {
    Continue,
    Finished(Message),
    Fallback,
}

/// Runs on every exit from `send`, including a dropped future.
struct TurnGuard {
    processing: Arc<AtomicBool>,
    state: Arc<Mutex<TurnState>>,
    buffer: ConversationBuffer,
    placeholder: Option<String>,
    cancelled_notice: String,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if let Some(id) = &self.placeholder {
            if self.buffer.get(id).is_some_and(|m| m.streaming) {
                warn!(message_id = %id, "Turn abandoned mid-flight, finalizing placeholder");
                let notice = std::mem::take(&mut self.cancelled_notice);
                if let Err(e) = self.buffer.update(id, |m| {
                    m.content = notice;
                    m.streaming = false;
                }) {
                    error!(error = %e, "Failed to finalize abandoned placeholder");
                }
            }
        }
        *self.state.lock() = TurnState::Idle;
        self.processing.store(false, Ordering::SeqCst);
    }
}

/// Owns the chat turn lifecycle for one conversation.
pub struct SessionController {
    config: ClientConfig,
    api: Arc<dyn ChatApi>,
    buffer: ConversationBuffer,
    budget: TokenBudget,
    translator: Arc<dyn Translator>,
    observer: Arc<dyn TurnObserver>,
    store: Option<(Arc<dyn ConversationStore>, String)>,
    state: Arc<Mutex<TurnState>>,
    processing: Arc<AtomicBool>,
    reasoning: String,
}

impl SessionController {
    /// Controller over `buffer`, with no store and identity translation.
    pub fn new(config: ClientConfig, api: Arc<dyn ChatApi>, buffer: ConversationBuffer) -> Self {
        Self {
            budget: TokenBudget::new(config.budget),
            config,
            api,
            buffer,
            translator: Arc::new(IdentityTranslator),
            observer: Arc::new(NoopObserver),
            store: None,
            state: Arc::new(Mutex::new(TurnState::Idle)),
            processing: Arc::new(AtomicBool::new(false)),
            reasoning: String::new(),
        }
    }

    /// Localizes notices.
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    /// Receives turn progress.
    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Saves the conversation under `name` after every finished turn.
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>, name: impl Into<String>) -> Self {
        self.store = Some((store, name.into()));
        self
    }

    /// Replaces the token estimator used by the budget.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.budget = self.budget.with_estimator(estimator);
        self
    }

    /// Shared handle for readers. Only this controller writes to it.
    pub fn buffer(&self) -> &ConversationBuffer {
        &self.buffer
    }

    /// Current turn state.
    pub fn state(&self) -> TurnState {
        *self.state.lock()
    }

    /// Reasoning text of the current turn, cleared on `reasoning_done`.
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// True while a turn is outstanding. Clone it to gate input elsewhere.
    pub fn processing(&self) -> Arc<AtomicBool> {
        self.processing.clone()
    }

    /// Whether a turn is outstanding.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: TurnState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Turn state changed");
            self.observer.on_update(&TurnUpdate::State(next));
        }
    }

    /// Sends one user message and processes the whole turn.
    ///
    /// Returns the finalized agent message. Transport and backend failures
    /// become that message's content rather than an `Err`. An `Err` means the
    /// turn never started or the buffer rejected a write.
    pub async fn send(&mut self, text: &str) -> FhirAssistResult<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FhirAssistError::Session("message is empty".into()));
        }
        if self.processing.swap(true, Ordering::SeqCst) {
            return Err(FhirAssistError::Busy("a turn is already in progress".into()));
        }
        let mut guard = TurnGuard {
            processing: self.processing.clone(),
            state: self.state.clone(),
            buffer: self.buffer.clone(),
            placeholder: None,
            cancelled_notice: self.translator.t(notices::CANCELLED),
        };

        self.buffer.push(Message::user(text))?;

        match self
            .budget
            .enforce(&self.buffer, self.api.as_ref(), self.translator.as_ref())
            .await
        {
            SummaryOutcome::Summarized { removed } => {
                self.observer.on_update(&TurnUpdate::Summarized { removed });
            }
            SummaryOutcome::Failed(reason) => {
                debug!(reason = %reason, "Proceeding without summarization");
            }
            SummaryOutcome::WithinBudget | SummaryOutcome::NothingToSummarize => {}
        }

        let placeholder = Message::placeholder();
        let mut turn = Turn::new(placeholder.id.clone(), UpdateThrottle::new(self.config.throttle));
        self.buffer.push(placeholder)?;
        guard.placeholder = Some(turn.id.clone());
        self.reasoning.clear();
        self.set_state(TurnState::AwaitingFirstByte);

        let request = ChatRequest {
            message: text.to_string(),
            conversation_id: self.buffer.conversation_id(),
            model: self.config.model.clone(),
        };
        info!(
            message_id = %turn.id,
            streaming = self.config.streaming,
            conversation_id = ?request.conversation_id,
            "Sending chat turn"
        );

        let outcome = if !self.api.is_available().await {
            self.set_state(TurnState::Errored);
            let notice = self.translator.t(notices::UNAVAILABLE);
            self.finalize_with(&mut turn, notice)
        } else if self.config.streaming {
            self.run_stream(&mut turn, &request).await
        } else {
            self.run_non_streaming(&mut turn, &request).await
        };

        let message = match outcome {
            Ok(message) => message,
            Err(e) => {
                let description = e.to_string();
                let category = FailureCategory::classify(&description);
                error!(error = %description, category = ?category, "Chat turn failed");
                self.set_state(TurnState::Errored);
                let notice = notices::warning(&self.translator.t(category.notice_key()));
                self.finalize_with(&mut turn, notice)?
            }
        };

        self.reasoning.clear();
        self.persist().await;
        self.set_state(TurnState::Idle);
        drop(guard);
        Ok(message)
    }

    async fn run_stream(
        &mut self,
        turn: &mut Turn,
        request: &ChatRequest,
    ) -> FhirAssistResult<Message> {
        let body = self.api.open_stream(request).await?;
        let mut frames = FrameStream::new(body);

        while let Some(frame) = frames.next_frame().await {
            let frame = frame?;
            for event in StreamEvent::from_frame(&frame) {
                if self.state() == TurnState::AwaitingFirstByte {
                    self.set_state(TurnState::Streaming);
                }
                debug!(kind = event.kind(), "Stream event");
                match self.apply(turn, event)? {
                    Flow::Continue => {}
                    Flow::Finished(message) => return Ok(message),
                    Flow::Fallback => return self.run_non_streaming(turn, request).await,
                }
            }
        }

        debug!(bytes = frames.bytes_seen(), "Stream ended without a done event");
        if turn.throttle.has_pending() {
            self.flush(turn)?;
        }
        self.finish(turn, None)
    }

    fn apply(&mut self, turn: &mut Turn, event: StreamEvent) -> FhirAssistResult<Flow> {
        match event {
            StreamEvent::Sources { sources } => {
                turn.sources = sources;
                let sources = turn.sources.clone();
                let message = self.buffer.update(&turn.id, |m| m.sources = sources)?;
                self.observer.on_update(&TurnUpdate::Flushed(message));
            }
            StreamEvent::Reasoning { content } => {
                self.reasoning.push_str(&content);
                self.observer.on_update(&TurnUpdate::Reasoning {
                    text: self.reasoning.clone(),
                });
            }
            StreamEvent::ReasoningDone => {
                if !self.reasoning.is_empty() {
                    self.reasoning.clear();
                    self.observer.on_update(&TurnUpdate::ReasoningDone);
                }
            }
            StreamEvent::FunctionCalling { name } => {
                info!(tool = %name, "Assistant is executing a tool");
                turn.content.push_str(&notices::tool_notification(&name));
                turn.tool_calls.push(name);
                // The notification flush also empties the chunk counter.
                turn.throttle.reset();
                self.flush(turn)?;
            }
            StreamEvent::Content { content } => {
                if content.is_empty() {
                    return Ok(Flow::Continue);
                }
                turn.content.push_str(&content);
                if turn.throttle.on_content(&content) {
                    self.flush(turn)?;
                }
            }
            StreamEvent::Done(done) => {
                return Ok(Flow::Finished(self.finish(turn, Some(done))?));
            }
            StreamEvent::Error { error } => {
                if notices::is_soft_stream_error(&error) {
                    warn!(error = %error, "Streaming unavailable, retrying without streaming");
                    self.set_state(TurnState::FallbackRequested);
                    return Ok(Flow::Fallback);
                }
                error!(error = %error, "Assistant reported an error");
                self.set_state(TurnState::Errored);
                let text = if error.trim().is_empty() {
                    self.translator.t(notices::STREAM_ERROR)
                } else {
                    error
                };
                return Ok(Flow::Finished(
                    self.finalize_with(turn, notices::warning(&text))?,
                ));
            }
        }
        Ok(Flow::Continue)
    }

    /// Sends the whole turn as one request and overwrites the placeholder.
    async fn run_non_streaming(
        &mut self,
        turn: &mut Turn,
        request: &ChatRequest,
    ) -> FhirAssistResult<Message> {
        self.set_state(TurnState::NonStreamingInFlight);
        let response = self.api.chat(request).await?;
        turn.content = response.answer.clone();
        turn.sources = response.sources.clone();
        self.set_state(TurnState::Finalizing);
        // The whole answer arrives at once and is written as is.
        self.write_final(turn, response.metadata())
    }

    fn flush(&self, turn: &Turn) -> FhirAssistResult<()> {
        let content = turn.content.clone();
        let tool_calls = turn.tool_calls.clone();
        let message = self.buffer.update(&turn.id, |m| {
            m.content = content;
            m.tool_calls = tool_calls;
        })?;
        self.observer.on_update(&TurnUpdate::Flushed(message));
        Ok(())
    }

    /// Validates the streamed answer and writes the final message.
    fn finish(&self, turn: &mut Turn, done: Option<DonePayload>) -> FhirAssistResult<Message> {
        self.set_state(TurnState::Finalizing);

        if let Some(patched) = notices::patch_empty_answer(
            &turn.content,
            &turn.tool_calls,
            self.config.min_answer_chars,
            self.translator.as_ref(),
        ) {
            warn!(
                message_id = %turn.id,
                tools = turn.tool_calls.len(),
                "Answer was empty, using fallback text"
            );
            turn.content = patched;
        }

        self.write_final(turn, done.unwrap_or_default())
    }

    /// Writes content, sources and metadata and clears the streaming flag.
    fn write_final(&self, turn: &Turn, done: DonePayload) -> FhirAssistResult<Message> {
        if let Some(id) = &done.conversation_id {
            if self.buffer.conversation_id().as_deref() != Some(id.as_str()) {
                self.buffer.set_conversation_id(Some(id.clone()));
            }
        }

        let content = turn.content.clone();
        let sources = turn.sources.clone();
        let tool_calls = turn.tool_calls.clone();
        let message = self.buffer.update(&turn.id, |m| {
            m.content = content;
            m.sources = sources;
            m.tool_calls = tool_calls;
            m.model = done.model;
            m.tokens_used = done.tokens_used;
            m.total_duration_ms = done.total_duration;
            m.tools_used = done.tools_used;
            m.streaming = false;
        })?;

        info!(
            message_id = %message.id,
            chars = message.content.chars().count(),
            tools = message.tool_calls.len(),
            model = ?message.model,
            "Turn finalized"
        );
        self.observer.on_update(&TurnUpdate::Finalized(message.clone()));
        Ok(message)
    }

    /// Finalizes with a notice in place of the answer.
    fn finalize_with(&self, turn: &mut Turn, notice: String) -> FhirAssistResult<Message> {
        self.set_state(TurnState::Finalizing);
        turn.content = notice.clone();
        let message = self.buffer.update(&turn.id, |m| {
            m.content = notice;
            m.streaming = false;
        })?;
        self.observer.on_update(&TurnUpdate::Finalized(message.clone()));
        Ok(message)
    }

    async fn persist(&self) {
        if let Some((store, name)) = &self.store {
            if let Err(e) = store.save(name, &self.buffer.snapshot()).await {
                warn!(name = %name, error = %e, "Failed to save conversation");
            }
        }
    }

    /// Clears the conversation back to its greeting.
    pub async fn reset(&mut self) -> FhirAssistResult<()> {
        if self.is_processing() {
            return Err(FhirAssistError::Busy("cannot reset while a turn is in progress".into()));
        }
        self.buffer.reset();
        self.reasoning.clear();
        self.persist().await;
        info!("Conversation reset");
        Ok(())
    }

    /// Probes the backend again and reports the result as an agent message.
    pub async fn retry_connection(&mut self) -> FhirAssistResult<bool> {
        if self.is_processing() {
            return Err(FhirAssistError::Busy("a turn is already in progress".into()));
        }
        let connected = self.api.retry_connection().await;
        let text = if connected {
            format!("{}{}", notices::SUCCESS_PREFIX, self.translator.t(notices::CONNECTED))
        } else {
            notices::warning(&self.translator.t(notices::NOT_CONNECTED))
        };
        self.buffer.push(Message::agent(text))?;
        self.persist().await;
        info!(connected, "Connection retried");
        Ok(connected)
    }
}
