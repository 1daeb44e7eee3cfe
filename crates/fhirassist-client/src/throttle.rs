use crate::config::ThrottleConfig;

/// Decides when streamed content is propagated to the conversation buffer.
///
/// Content is flushed on every Nth chunk, or at once for a chunk longer than
/// the immediate threshold. Any flush restarts the count, so a non-zero
/// counter always means content is waiting.
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    every_n_chunks: u32,
    immediate_len: usize,
    pending: u32,
}

impl UpdateThrottle {
    /// Throttle with an empty counter.
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            every_n_chunks: config.every_n_chunks.max(1),
            immediate_len: config.immediate_len,
            pending: 0,
        }
    }

    /// Records one content chunk. Returns true when the caller should flush now.
    pub fn on_content(&mut self, chunk: &str) -> bool {
        self.pending += 1;
        if self.pending >= self.every_n_chunks || chunk.chars().count() > self.immediate_len {
            self.pending = 0;
            return true;
        }
        false
    }

    /// Whether chunks have arrived since the last flush.
    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    /// Forgets pending chunks after an out-of-band flush.
    pub fn reset(&mut self) {
        self.pending = 0;
    }
}

impl Default for UpdateThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}
