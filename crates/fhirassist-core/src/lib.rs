//! Core types and error definitions for the fhirassist chat client.
//!
//! This crate provides the foundational types shared across all fhirassist crates,
//! including error handling, chat message representations, and the citation and
//! usage metadata the assistant backend attaches to its answers.
//!
//! # Main types
//!
//! - [`FhirAssistError`]: Unified error enum for all fhirassist subsystems.
//! - [`FhirAssistResult`]: Convenience alias for `Result<T, FhirAssistError>`.
//! - [`Role`]: Message role (user or agent).
//! - [`Message`]: A single chat message, possibly still streaming.
//! - [`DocumentChunk`]: A read-only citation attached to an agent answer.
//! - [`TokenUsage`] / [`ToolsUsed`]: Completion metadata reported by the backend.

/// Chat message and metadata types.
pub mod message;

pub use message::{
    DocumentChunk, Message, Role, TokenUsage, ToolExecution, ToolStatus, ToolsUsed,
};

// --- Error types ---

/// Top-level error type for the fhirassist client.
///
/// The `Display` strings are part of the contract: the session controller maps
/// transport failures to user-facing categories by looking for `"timed out"` and
/// `"network"` in the rendered error.
#[derive(Debug, thiserror::Error)]
pub enum FhirAssistError {
    /// A non-success HTTP status or an unusable response body.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The connection could not be established or the request never completed.
    #[error("network error: {0}")]
    Network(String),

    /// The connection or the stream stayed silent for longer than allowed.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Reading the response body failed after the stream was opened.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A conversation buffer invariant was violated or a message was not found.
    #[error("Session error: {0}")]
    Session(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A turn was submitted while another one is still in flight.
    #[error("Busy: {0}")]
    Busy(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`FhirAssistError`].
pub type FhirAssistResult<T> = Result<T, FhirAssistError>;
