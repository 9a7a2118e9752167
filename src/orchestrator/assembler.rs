//! Tool-call assembler (§4.11 step 3a) — buffers each streamed tool
//! block's `input_json_delta` chunks by block index and finalises the
//! arguments JSON on `content_block_stop`.

use crate::providers::base::ToolCallRequest;
use std::collections::BTreeMap;

struct PendingCall {
    id: String,
    name: String,
    json_buf: String,
}

/// Accumulates streamed tool-use blocks for one model turn. One instance
/// per streamed response; discard after the stream ends.
#[derive(Default)]
pub struct ToolCallAssembler {
    pending: BTreeMap<usize, PendingCall>,
    /// Block indices whose JSON failed to parse on finalisation —
    /// reported back to the orchestrator as parse failures (§7 `parse_error`).
    failed: Vec<(usize, String)>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_block(&mut self, index: usize, tool_id: Option<String>, tool_name: Option<String>) {
        if let (Some(id), Some(name)) = (tool_id, tool_name) {
            self.pending.insert(index, PendingCall { id, name, json_buf: String::new() });
        }
    }

    pub fn append_delta(&mut self, index: usize, json_fragment: &str) {
        if let Some(call) = self.pending.get_mut(&index) {
            call.json_buf.push_str(json_fragment);
        }
    }

    /// Finalise one block: parse its accumulated JSON into arguments. A
    /// malformed payload is recorded as a parse failure rather than
    /// panicking or silently dropping the call.
    pub fn finalize_block(&mut self, index: usize) -> Option<ToolCallRequest> {
        let call = self.pending.remove(&index)?;
        let arguments = if call.json_buf.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.json_buf) {
                Ok(v) => v,
                Err(e) => {
                    self.failed.push((index, format!("malformed tool-call arguments for '{}': {e}", call.name)));
                    return None;
                }
            }
        };
        Some(ToolCallRequest { id: call.id, name: call.name, arguments })
    }

    /// On a stream-level error, every still-open block is marked failed
    /// rather than silently discarded.
    pub fn fail_incomplete(&mut self, reason: &str) {
        for (index, call) in std::mem::take(&mut self.pending) {
            self.failed.push((index, format!("tool call '{}' incomplete: {reason}", call.name)));
        }
    }

    pub fn take_failures(&mut self) -> Vec<(usize, String)> {
        std::mem::take(&mut self.failed)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
