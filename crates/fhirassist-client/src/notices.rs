//! User-visible strings and the content-integrity rules built on them.
//!
//! Every notice is a translation key; the English text doubles as the key so
//! an untranslated deployment still reads naturally.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Replaces an answer that came back empty.
pub const EMPTY_ANSWER: &str = "I apologize, but I was unable to generate a proper response. This might be due to a processing issue. Please try rephrasing your question or try again.";
/// Lead-in for the list of tools called before an empty answer.
pub const TOOLS_CALLED: &str = "I called the following functions";
/// Follows the tool list when the answer came back empty.
pub const TOOLS_WITHOUT_ANSWER: &str = "However, I was unable to generate a proper response with the results. Please try rephrasing your question or ask me to explain what I found.";
/// The backend sent an `error` event without text.
pub const STREAM_ERROR: &str = "I encountered an issue processing your request. Please try again.";
/// Transport failure: timeout.
pub const TIMEOUT: &str = "The request took too long to complete. Please try again with a shorter question.";
/// Transport failure: connectivity.
pub const NETWORK: &str = "Unable to connect to the AI service. Please check your connection and try again.";
/// Transport failure: anything else.
pub const GENERIC_FAILURE: &str = "I'm sorry, I'm having trouble processing your request right now. Please try again.";
/// The availability probe failed.
pub const UNAVAILABLE: &str = "AI Assistant service is currently unavailable. Please try again later or contact your administrator.";
/// The turn was abandoned before it finished.
pub const CANCELLED: &str = "The request was cancelled. Please try again.";
/// Heading of the synthetic summary message.
pub const SUMMARY_HEADING: &str = "Summary of earlier conversation";
/// A connection retry succeeded.
pub const CONNECTED: &str = "Successfully connected to AI Assistant! You can now ask questions and get intelligent responses.";
/// A connection retry failed.
pub const NOT_CONNECTED: &str = "Unable to connect to the AI assistant service. Please make sure it is running and try again.";

/// Prefix of every warning shown in place of an answer.
pub const WARNING_PREFIX: &str = "⚠️ ";
/// Prefix of a successful connection notice.
pub const SUCCESS_PREFIX: &str = "✅ ";

static NOTIFICATION: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\n\n🔧 \*\*Executing:.*?\*\*\n\n").expect("notification pattern is valid")
});

/// Localization hook: maps a notice key to display text.
pub trait Translator: Send + Sync {
    /// Display text for `key`.
    fn t(&self, key: &str) -> String;
}

/// Returns every key unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslator;

impl Translator for IdentityTranslator {
    fn t(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Looks keys up in a table, falling back to the key itself.
#[derive(Debug, Default, Clone)]
pub struct TableTranslator {
    table: HashMap<String, String>,
}

impl TableTranslator {
    /// Translator over `table`.
    pub fn new(table: HashMap<String, String>) -> Self {
        Self { table }
    }
}

impl Translator for TableTranslator {
    fn t(&self, key: &str) -> String {
        self.table
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

/// User-facing category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// The request took too long.
    Timeout,
    /// The server could not be reached.
    Network,
    /// Anything else.
    Generic,
}

impl FailureCategory {
    /// Classifies an error description by substring.
    pub fn classify(description: &str) -> Self {
        let lower = description.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            FailureCategory::Timeout
        } else if lower.contains("network") || lower.contains("fetch") {
            FailureCategory::Network
        } else {
            FailureCategory::Generic
        }
    }

    /// Translation key of the notice shown for this category.
    pub fn notice_key(self) -> &'static str {
        match self {
            FailureCategory::Timeout => TIMEOUT,
            FailureCategory::Network => NETWORK,
            FailureCategory::Generic => GENERIC_FAILURE,
        }
    }
}

/// Whether a backend `error` event should be retried as a non-streaming request.
pub fn is_soft_stream_error(error: &str) -> bool {
    error.contains("temporarily unavailable") || error.contains("not supported")
}

/// `list_smart_apps` becomes `List Smart Apps`.
pub fn display_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for c in name.chars() {
        let c = if c == '_' { ' ' } else { c };
        if at_word_start && c.is_alphanumeric() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !c.is_alphanumeric();
    }
    out
}

/// The line appended to an answer when the backend starts a tool.
pub fn tool_notification(name: &str) -> String {
    format!("\n\n🔧 **Executing: {}**\n\n", display_tool_name(name))
}

/// Answer text with every tool notification removed.
pub fn strip_tool_notifications(content: &str) -> String {
    NOTIFICATION.replace_all(content, "").into_owned()
}

/// Checks a finished answer and returns the text to store instead, if it is
/// effectively empty (fewer than `min_chars` characters once tool
/// notifications are removed).
///
/// With tool calls the explanation is appended so the notifications stay
/// visible; without them the whole answer is replaced.
pub fn patch_empty_answer(
    content: &str,
    tool_calls: &[String],
    min_chars: usize,
    translator: &dyn Translator,
) -> Option<String> {
    let remaining = strip_tool_notifications(content);
    if remaining.trim().chars().count() >= min_chars {
        return None;
    }

    if tool_calls.is_empty() {
        return Some(translator.t(EMPTY_ANSWER));
    }

    let tools = tool_calls
        .iter()
        .map(|name| name.replace('_', " "))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "{content}\n\n{}: **{tools}**\n\n{}",
        translator.t(TOOLS_CALLED),
        translator.t(TOOLS_WITHOUT_ANSWER)
    ))
}

/// Warning-prefixed display text.
pub fn warning(text: &str) -> String {
    format!("{WARNING_PREFIX}{text}")
}
