//! Working memory: the per-session, in-process message buffer (§4.8, C8).
//!
//! Unlike episodic/semantic memory, this tier never touches disk — it is
//! the live conversation window the orchestrator reads on every turn.
//! Writes are gated by [`crate::labels::fc3_working_memory_write`] (FC-3):
//! secret-classed content is rejected rather than silently redacted, since
//! this buffer has no redaction step of its own.

use crate::labels::{combine_all, fc3_working_memory_write, ContentLabel, FlowDecision};

#[derive(Debug, Clone)]
pub struct WorkingMessage {
    pub role: String,
    pub content: String,
    pub label: ContentLabel,
    /// System/instruction messages are never evicted by the capacity or
    /// token-cap policies; only the oldest non-system entries are.
    pub is_system: bool,
}

/// Rough token estimate used for the token-cap eviction policy. Exact
/// tokenization depends on the model in use; this crate has no tokenizer
/// dependency, so it approximates at ~4 characters per token, matching
/// the rule of thumb most providers publish for English text.
fn approx_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// A bounded, append-only (until eviction) buffer of conversation turns
/// for one session.
#[derive(Debug, Clone)]
pub struct WorkingMemory {
    messages: Vec<WorkingMessage>,
    capacity: usize,
    token_cap: usize,
}

impl WorkingMemory {
    pub fn new(capacity: usize, token_cap: usize) -> Self {
        Self { messages: Vec::new(), capacity, token_cap }
    }

    /// FC-3: appends `message` if its label isn't `secret`-classed, then
    /// enforces the message-count and token-cap eviction policies.
    pub fn append(
        &mut self,
        role: impl Into<String>,
        content: impl Into<String>,
        label: ContentLabel,
        is_system: bool,
    ) -> Result<(), FlowDecision> {
        let decision = fc3_working_memory_write(&label);
        if let FlowDecision::Denied { reason } = decision {
            return Err(FlowDecision::Denied { reason });
        }

        self.messages.push(WorkingMessage { role: role.into(), content: content.into(), label, is_system });
        self.evict();
        Ok(())
    }

    /// Evicts the oldest non-system entries first until the buffer is at
    /// or under both the message-count capacity and the approximate
    /// token cap.
    fn evict(&mut self) {
        while self.messages.len() > self.capacity {
            if !self.remove_oldest_non_system() {
                break;
            }
        }
        while self.total_tokens() > self.token_cap {
            if !self.remove_oldest_non_system() {
                break;
            }
        }
    }

    fn remove_oldest_non_system(&mut self) -> bool {
        if let Some(idx) = self.messages.iter().position(|m| !m.is_system) {
            self.messages.remove(idx);
            true
        } else {
            false
        }
    }

    fn total_tokens(&self) -> usize {
        self.messages.iter().map(|m| approx_tokens(&m.content)).sum()
    }

    pub fn messages(&self) -> &[WorkingMessage] {
        &self.messages
    }

    /// The combined trust/sensitivity label across every message
    /// currently held, via [`combine_all`]. `None` when the buffer is
    /// empty.
    pub fn combined_label(&self) -> Option<ContentLabel> {
        combine_all(self.messages.iter().map(|m| &m.label))
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests;
