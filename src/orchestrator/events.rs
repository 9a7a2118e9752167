//! Channel ↔ orchestrator event surface (§6, C11).

use serde::Serialize;

/// Inbound events a channel sends to the orchestrator for one session.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    UserMessage { content: String },
    ApprovalResponse { id: String, granted: bool },
    Cancel { turn_id: u64 },
}

/// Outbound events the orchestrator emits to a channel. Args/output are
/// always already redacted+truncated by the time they reach this type
/// (I-T2) — this type carries display strings, not raw tool data.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    StreamStart { stream_id: String },
    StreamDelta { stream_id: String, delta: String },
    StreamEnd { stream_id: String },
    ToolUse { id: String, name: String, args: String },
    ToolResult { id: String, name: String, success: bool, output: String },
    AssistantMessage { content: String },
    Error { code: String, message: String, recoverable: bool },
    ApprovalRequired { id: String, tool: String, action: String, target: String, reason: String, is_dangerous: bool },
    TurnComplete { turn_number: u64 },
}

/// A sink a channel implements to receive orchestrator events. Kept as a
/// trait (rather than a concrete mpsc sender) so CLI/chat/test channels
/// can each wire it however suits their transport.
#[async_trait::async_trait]
pub trait ChannelSink: Send + Sync {
    async fn emit(&self, event: ChannelEvent);
}

/// A sink that records every event in order, for tests asserting
/// P-ORDER-style sequences.
#[derive(Default)]
pub struct RecordingSink {
    pub events: tokio::sync::Mutex<Vec<ChannelEvent>>,
}

#[async_trait::async_trait]
impl ChannelSink for RecordingSink {
    async fn emit(&self, event: ChannelEvent) {
        self.events.lock().await.push(event);
    }
}
