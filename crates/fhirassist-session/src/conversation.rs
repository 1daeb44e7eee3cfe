use chrono::{DateTime, Utc};
use fhirassist_core::{FhirAssistError, FhirAssistResult, Message, Role};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An ordered chat history plus the backend's conversation identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Messages in append order.
    pub messages: Vec<Message>,
    /// Identifier assigned by the assistant backend, if any.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Last scroll position of the rendering surface. View state only.
    #[serde(default)]
    pub scroll_offset: Option<f64>,
    /// UTC timestamp of the last mutation.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Creates an empty conversation.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            conversation_id: None,
            scroll_offset: None,
            updated_at: Utc::now(),
        }
    }

    /// Creates a conversation seeded with an agent greeting, if one is given.
    pub fn seeded(greeting: Option<&str>) -> Self {
        let mut conversation = Self::new();
        if let Some(text) = greeting {
            conversation.messages.push(Message::agent(text));
        }
        conversation
    }

    /// Number of messages.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// The message currently receiving streamed content, if any.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.streaming)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

struct BufferState {
    conversation: Conversation,
    revision: u64,
    greeting: Option<String>,
}

impl BufferState {
    fn touch(&mut self) {
        self.revision += 1;
        self.conversation.updated_at = Utc::now();
    }
}

/// Shared handle to the in-memory conversation.
///
/// The session controller is the only writer. Every mutation replaces a whole
/// message or the whole list under the write lock, so readers calling
/// [`snapshot`](Self::snapshot) never observe a half-applied update.
#[derive(Clone)]
pub struct ConversationBuffer {
    inner: Arc<RwLock<BufferState>>,
}

impl ConversationBuffer {
    /// Creates a buffer seeded with an optional greeting.
    pub fn new(greeting: Option<String>) -> Self {
        let conversation = Conversation::seeded(greeting.as_deref());
        Self::build(conversation, greeting)
    }

    /// Wraps a previously persisted conversation.
    ///
    /// A message left `streaming` by an interrupted session is finalized as-is,
    /// since nothing will ever append to it again.
    pub fn from_conversation(mut conversation: Conversation, greeting: Option<String>) -> Self {
        for message in &mut conversation.messages {
            message.streaming = false;
        }
        Self::build(conversation, greeting)
    }

    fn build(conversation: Conversation, greeting: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(BufferState {
                conversation,
                revision: 0,
                greeting,
            })),
        }
    }

    /// A consistent copy of the whole conversation.
    pub fn snapshot(&self) -> Conversation {
        self.inner.read().conversation.clone()
    }

    /// A consistent copy of the message list.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.read().conversation.messages.clone()
    }

    /// The message list together with the revision it was read at.
    pub fn versioned_messages(&self) -> (u64, Vec<Message>) {
        let state = self.inner.read();
        (state.revision, state.conversation.messages.clone())
    }

    /// Copy of a single message.
    pub fn get(&self, id: &str) -> Option<Message> {
        self.inner
            .read()
            .conversation
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.inner.read().conversation.messages.len()
    }

    /// Whether the buffer holds no messages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonic mutation counter. Changes on every successful write.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// The backend conversation identifier.
    pub fn conversation_id(&self) -> Option<String> {
        self.inner.read().conversation.conversation_id.clone()
    }

    /// Records the backend conversation identifier.
    pub fn set_conversation_id(&self, id: Option<String>) {
        let mut state = self.inner.write();
        state.conversation.conversation_id = id;
        state.touch();
    }

    /// Records the rendering surface's scroll position.
    pub fn set_scroll_offset(&self, offset: Option<f64>) {
        self.inner.write().conversation.scroll_offset = offset;
    }

    /// The message currently receiving streamed content, if any.
    pub fn streaming_message(&self) -> Option<Message> {
        self.inner.read().conversation.streaming_message().cloned()
    }

    /// Appends a message.
    ///
    /// Only an agent message may be streaming, and while one is streaming no
    /// other agent message may be added.
    pub fn push(&self, message: Message) -> FhirAssistResult<()> {
        let mut state = self.inner.write();
        let has_streaming = state.conversation.streaming_message().is_some();

        if message.streaming && message.role != Role::Agent {
            return Err(FhirAssistError::Session(
                "only agent messages can stream".into(),
            ));
        }
        if has_streaming && message.role == Role::Agent {
            return Err(FhirAssistError::Session(
                "an agent message is already streaming".into(),
            ));
        }

        state.conversation.messages.push(message);
        state.touch();
        Ok(())
    }

    /// Replaces one message with an edited copy and returns the stored result.
    ///
    /// While the message is streaming its content may only grow; the write that
    /// clears `streaming` may set any content. Finalized messages are immutable.
    pub fn update<F>(&self, id: &str, edit: F) -> FhirAssistResult<Message>
    where
        F: FnOnce(&mut Message),
    {
        let mut state = self.inner.write();
        let index = state
            .conversation
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| FhirAssistError::Session(format!("message {id} not found")))?;

        let current = &state.conversation.messages[index];
        if !current.streaming {
            return Err(FhirAssistError::Session(format!(
                "message {id} is finalized"
            )));
        }

        let mut next = current.clone();
        edit(&mut next);

        if next.id != current.id || next.role != current.role {
            return Err(FhirAssistError::Session(
                "message identity cannot change".into(),
            ));
        }
        if next.streaming && !next.content.starts_with(current.content.as_str()) {
            return Err(FhirAssistError::Session(format!(
                "message {id} content is append-only while streaming"
            )));
        }

        state.conversation.messages[index] = next.clone();
        state.touch();
        Ok(next)
    }

    /// Replaces every message except the last `keep_recent` with `summary`.
    ///
    /// Fails without touching the buffer if it changed since `expected_revision`
    /// or if the replaced range holds a streaming message. Returns the number of
    /// messages removed.
    pub fn replace_older_with_summary(
        &self,
        expected_revision: u64,
        keep_recent: usize,
        summary: Message,
    ) -> FhirAssistResult<usize> {
        let mut state = self.inner.write();
        if state.revision != expected_revision {
            return Err(FhirAssistError::Session(format!(
                "conversation changed during summarization (revision {} != {expected_revision})",
                state.revision
            )));
        }

        let total = state.conversation.messages.len();
        if total <= keep_recent {
            return Ok(0);
        }
        let split = total - keep_recent;
        if state.conversation.messages[..split].iter().any(|m| m.streaming) {
            return Err(FhirAssistError::Session(
                "cannot summarize a streaming message".into(),
            ));
        }

        let recent = state.conversation.messages.split_off(split);
        let mut messages = Vec::with_capacity(recent.len() + 1);
        messages.push(summary);
        messages.extend(recent);
        state.conversation.messages = messages;
        state.touch();
        Ok(split)
    }

    /// Restores the seeded state: greeting only, no conversation id.
    pub fn reset(&self) {
        let mut state = self.inner.write();
        let greeting = state.greeting.clone();
        state.conversation = Conversation::seeded(greeting.as_deref());
        state.touch();
    }
}

impl Default for ConversationBuffer {
    fn default() -> Self {
        Self::new(None)
    }
}
