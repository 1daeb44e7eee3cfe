//! Conversation state for the fhirassist chat client.
//!
//! [`ConversationBuffer`] is the shared, snapshot-consistent message list the
//! session controller writes to; [`ConversationStore`] is the load/save boundary
//! used to replay a conversation after a restart.

/// The in-memory message list.
pub mod conversation;
/// Persistence.
pub mod store;

pub use conversation::{Conversation, ConversationBuffer};
pub use store::{ConversationStore, FileConversationStore};
