use crate::api::{ApiMessage, ChatApi, SummarizeRequest};
use crate::config::BudgetConfig;
use crate::notices::{self, Translator};
use fhirassist_core::{Message, Role};
use fhirassist_session::ConversationBuffer;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tokens charged per message for role and framing.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Approximates the token cost of text. Not an exact tokenizer.
pub trait TokenEstimator: Send + Sync {
    /// Estimated tokens for `text`.
    fn estimate(&self, text: &str) -> usize;

    /// Estimated tokens for a message list, framing included.
    fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| self.estimate(&m.content) + MESSAGE_OVERHEAD_TOKENS)
            .sum()
    }
}

/// Fixed characters-per-token ratio (4 chars ≈ 1 token by default).
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    /// Estimator with the given ratio; zero is treated as one.
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}

/// Result of a budget check before a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Under the limit; nothing to do.
    WithinBudget,
    /// Over budget, but everything is inside the recent window.
    NothingToSummarize,
    /// Older messages were replaced by one summary.
    Summarized { removed: usize },
    /// Summarization failed; the buffer was left as it was.
    Failed(String),
}

/// Keeps the conversation under the configured token budget by condensing
/// older turns into one summary message.
pub struct TokenBudget {
    config: BudgetConfig,
    estimator: Arc<dyn TokenEstimator>,
}

impl TokenBudget {
    /// Budget using the default estimator for `config`.
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            estimator: Arc::new(CharRatioEstimator::new(config.chars_per_token)),
            config,
        }
    }

    /// Replaces the estimator.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// The limits in use.
    pub fn config(&self) -> BudgetConfig {
        self.config
    }

    /// Estimated tokens for `messages`.
    pub fn estimate(&self, messages: &[Message]) -> usize {
        self.estimator.estimate_messages(messages)
    }

    /// Whether `messages` exceed the token limit.
    pub fn is_exceeded(&self, messages: &[Message]) -> bool {
        self.estimate(messages) > self.config.max_conversation_tokens
    }

    /// Summarizes the buffer if it is over budget.
    ///
    /// Never fails the turn: on any error the buffer keeps its full history and
    /// the outcome says why.
    pub async fn enforce(
        &self,
        buffer: &ConversationBuffer,
        api: &dyn ChatApi,
        translator: &dyn Translator,
    ) -> SummaryOutcome {
        let (revision, messages) = buffer.versioned_messages();
        let estimated = self.estimate(&messages);
        if estimated <= self.config.max_conversation_tokens {
            return SummaryOutcome::WithinBudget;
        }

        let keep = self.config.keep_recent_messages;
        if messages.len() <= keep {
            debug!(estimated, messages = messages.len(), "Over budget but nothing old enough to summarize");
            return SummaryOutcome::NothingToSummarize;
        }

        info!(
            estimated,
            max = self.config.max_conversation_tokens,
            messages = messages.len(),
            keep,
            "Summarizing older conversation turns"
        );

        let request = SummarizeRequest {
            messages: messages.iter().map(ApiMessage::from).collect(),
            keep_recent_count: keep,
        };
        let response = match api.summarize(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Summarization failed, continuing with full history");
                return SummaryOutcome::Failed(e.to_string());
            }
        };

        let text = response.answer.trim();
        if text.is_empty() {
            warn!("Summarization returned no text, continuing with full history");
            return SummaryOutcome::Failed("empty summary".to_string());
        }

        let summary = Message::new(
            Role::Agent,
            format!("**{}**\n\n{text}", translator.t(notices::SUMMARY_HEADING)),
        );
        match buffer.replace_older_with_summary(revision, keep, summary) {
            Ok(removed) => {
                info!(removed, remaining = buffer.len(), "Conversation summarized");
                SummaryOutcome::Summarized { removed }
            }
            Err(e) => {
                warn!(error = %e, "Could not apply summary, continuing with full history");
                SummaryOutcome::Failed(e.to_string())
            }
        }
    }
}
