//! Streaming chat client for the SMART-on-FHIR admin assistant.
//!
//! The pipeline, leaf to root:
//!
//! - [`sse`]: byte chunks to JSON frames, safe across any chunk boundary.
//! - [`stream`]: frames to typed [`StreamEvent`]s.
//! - [`budget`]: token estimate of the conversation and summarization.
//! - [`controller`]: the turn state machine writing into the
//!   [`ConversationBuffer`](fhirassist_session::ConversationBuffer).
//!
//! [`HttpChatApi`] is the production [`ChatApi`].

/// Wire types and the backend trait.
pub mod api;
/// Token estimate and summarization.
pub mod budget;
/// Client settings.
pub mod config;
/// Turn lifecycle.
pub mod controller;
/// Admin API over HTTP.
pub mod http;
/// Notices and answer validation.
pub mod notices;
/// Stream framing.
pub mod sse;
/// Typed stream events.
pub mod stream;
/// Content update throttling.
pub mod throttle;

pub use api::{ApiMessage, ChatApi, ChatRequest, ChatResponse, SummarizeRequest};
pub use budget::{CharRatioEstimator, SummaryOutcome, TokenBudget, TokenEstimator};
pub use config::{BudgetConfig, ClientConfig, EndpointConfig, ThrottleConfig};
pub use controller::{NoopObserver, SessionController, TurnObserver, TurnState, TurnUpdate};
pub use http::HttpChatApi;
pub use notices::{FailureCategory, IdentityTranslator, TableTranslator, Translator};
pub use sse::{ByteStream, FrameStream, SseDecoder};
pub use stream::{DonePayload, StreamEvent};
pub use throttle::UpdateThrottle;
