use fhirassist_client::{TurnObserver, TurnUpdate};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// What to print so the terminal shows `content`.
#[derive(Debug, PartialEq, Eq)]
enum Delta<'a> {
    Append(&'a str),
    /// The content no longer extends what is on screen.
    Replace(&'a str),
}

fn delta<'a>(shown: &str, content: &'a str) -> Delta<'a> {
    match content.strip_prefix(shown) {
        Some(rest) => Delta::Append(rest),
        None => Delta::Replace(content),
    }
}

/// Prints a turn to the terminal as it streams.
///
/// Streamed content only grows, so each flush prints the new suffix. A final
/// write that replaced the content is printed whole on a fresh line.
#[derive(Default)]
pub struct TerminalObserver {
    shown: Mutex<String>,
    thinking: AtomicBool,
}

impl TerminalObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

impl TurnObserver for TerminalObserver {
    fn on_update(&self, update: &TurnUpdate) {
        match update {
            TurnUpdate::Summarized { removed } => {
                eprintln!("[{removed} earlier messages summarized]");
            }
            TurnUpdate::Reasoning { .. } => {
                if !self.thinking.swap(true, Ordering::SeqCst) {
                    eprintln!("[thinking...]");
                }
            }
            TurnUpdate::ReasoningDone | TurnUpdate::State(_) => {}
            TurnUpdate::Flushed(message) => {
                let mut shown = self.shown.lock();
                if let Delta::Append(rest) = delta(&shown, &message.content) {
                    self.emit(rest);
                    *shown = message.content.clone();
                }
            }
            TurnUpdate::Finalized(message) => {
                let mut shown = self.shown.lock();
                match delta(&shown, &message.content) {
                    Delta::Append(rest) => self.emit(rest),
                    Delta::Replace(content) => {
                        self.emit("\n");
                        self.emit(content);
                    }
                }
                self.emit("\n\n");
                shown.clear();
                self.thinking.store(false, Ordering::SeqCst);
            }
        }
    }
}
