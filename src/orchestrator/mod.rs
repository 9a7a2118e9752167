//! Conversation orchestrator (§4.11, C11) — the state machine that turns
//! one inbound user message into a finished turn: it drives the model,
//! assembles and dispatches tool calls through the [`ToolPipeline`],
//! waits on approvals, and streams [`events::ChannelEvent`]s back out.

pub mod assembler;
pub mod cost;
pub mod events;

pub use events::{ChannelEvent, ChannelSink, InboundEvent, RecordingSink};

use assembler::ToolCallAssembler;
use crate::agent::tools::{ExecutionContext, PipelineOutcome, ToolPipeline};
use crate::errors::{CoreError, CoreResult};
use crate::memory::MemoryManager;
use crate::providers::base::{
    ChatRequest, ContentDelta, LLMProvider, Message, StreamEvent, ToolDefinition,
};
use crate::session::manager::{Session, SessionManager};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One model/tool exchange within a session. Tracked so `TurnComplete`
/// can report a turn number and so `maxToolCallsPerTurn` resets each turn.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub number: u64,
    pub tool_calls_made: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Bounds the orchestrator enforces per §4.11 and §5.
#[derive(Debug, Clone)]
pub struct OrchestratorLimits {
    pub max_turns: u32,
    pub max_tool_calls_per_turn: u32,
    pub max_queue_size: usize,
}

impl Default for OrchestratorLimits {
    fn default() -> Self {
        Self {
            max_turns: 200,
            max_tool_calls_per_turn: 25,
            max_queue_size: 5,
        }
    }
}

/// Where a session sits in its own processing lifecycle (§5's suspension
/// points: `streaming`, `executing_tool`, `waiting_approval`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Processing,
}

/// Per-session mutable state: queued inbound events, current phase,
/// cancellation flag, and the turn counter. One instance lives behind the
/// `Orchestrator`'s session map for the lifetime of that session.
struct SessionState {
    phase: Mutex<Phase>,
    queue: Mutex<VecDeque<InboundEvent>>,
    cancel: AtomicBool,
    turn_counter: AtomicU64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Idle),
            queue: Mutex::new(VecDeque::new()),
            cancel: AtomicBool::new(false),
            turn_counter: AtomicU64::new(0),
        }
    }
}

/// Drives one session's conversation loop: session storage, the model,
/// the tool pipeline, memory, and the channel it reports events to.
pub struct Orchestrator {
    sessions: SessionManager,
    provider: Arc<dyn LLMProvider>,
    tools: Arc<ToolPipeline>,
    tool_definitions: Vec<ToolDefinition>,
    memory: Arc<MemoryManager>,
    limits: OrchestratorLimits,
    states: Mutex<std::collections::HashMap<String, Arc<SessionState>>>,
}

impl Orchestrator {
    pub fn new(
        sessions: SessionManager,
        provider: Arc<dyn LLMProvider>,
        tools: Arc<ToolPipeline>,
        tool_definitions: Vec<ToolDefinition>,
        memory: Arc<MemoryManager>,
    ) -> Self {
        Self {
            sessions,
            provider,
            tools,
            tool_definitions,
            memory,
            limits: OrchestratorLimits::default(),
            states: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn with_limits(mut self, limits: OrchestratorLimits) -> Self {
        self.limits = limits;
        self
    }

    async fn state_for(&self, session_id: &str) -> Arc<SessionState> {
        let mut states = self.states.lock().await;
        states
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionState::new()))
            .clone()
    }

    /// Mark the given turn cancelled. Checked at each suspension point
    /// inside [`Self::run_turn`]; has no effect once the turn has already
    /// finished.
    pub async fn cancel(&self, session_id: &str, _turn_id: u64) {
        let state = self.state_for(session_id).await;
        state.cancel.store(true, Ordering::SeqCst);
    }

    /// Accept one inbound event for a session. If the session is idle it
    /// is processed immediately; otherwise it is queued (FIFO, bounded by
    /// `maxQueueSize`) and drained once the current turn finishes.
    pub async fn handle(
        &self,
        session_id: &str,
        event: InboundEvent,
        sink: &dyn ChannelSink,
    ) -> CoreResult<()> {
        let state = self.state_for(session_id).await;

        if let InboundEvent::Cancel { turn_id } = event {
            state.cancel.store(true, Ordering::SeqCst);
            let _ = turn_id;
            return Ok(());
        }

        {
            let phase = *state.phase.lock().await;
            if phase == Phase::Idle {
                drop(phase);
                *state.phase.lock().await = Phase::Processing;
            } else {
                let mut queue = state.queue.lock().await;
                if queue.len() >= self.limits.max_queue_size {
                    sink.emit(ChannelEvent::Error {
                        code: CoreError::Busy.channel_code().to_string(),
                        message: CoreError::Busy.channel_message(),
                        recoverable: true,
                    })
                    .await;
                    return Err(CoreError::Busy);
                }
                queue.push_back(event);
                return Ok(());
            }
        }

        let mut next = Some(event);
        while let Some(ev) = next.take() {
            if let Err(e) = self.drive(session_id, &state, ev, sink).await {
                sink.emit(ChannelEvent::Error {
                    code: e.channel_code().to_string(),
                    message: e.channel_message(),
                    recoverable: !matches!(e, CoreError::MaxTurnsExceeded(_)),
                })
                .await;
            }
            next = state.queue.lock().await.pop_front();
        }

        *state.phase.lock().await = Phase::Idle;
        Ok(())
    }

    async fn drive(
        &self,
        session_id: &str,
        state: &SessionState,
        event: InboundEvent,
        sink: &dyn ChannelSink,
    ) -> CoreResult<()> {
        match event {
            InboundEvent::UserMessage { content } => {
                self.run_turn(session_id, state, content, sink).await
            }
            InboundEvent::ApprovalResponse { .. } | InboundEvent::Cancel { .. } => Ok(()),
        }
    }

    /// Runs one full turn: append the user message, then loop model
    /// responses and tool calls until the model stops asking for tools
    /// (or a limit is hit). Mirrors §4.11 steps 1-4.
    async fn run_turn(
        &self,
        session_id: &str,
        state: &SessionState,
        user_content: String,
        sink: &dyn ChannelSink,
    ) -> CoreResult<()> {
        let turn_number = state.turn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if turn_number as u32 > self.limits.max_turns {
            return Err(CoreError::MaxTurnsExceeded(self.limits.max_turns));
        }
        state.cancel.store(false, Ordering::SeqCst);

        let mut session = self
            .sessions
            .get_or_create(session_id)
            .await
            .map_err(|e| CoreError::Session(e.to_string()))?;
        self.sessions.record_message(&mut session, "user", user_content, Default::default());

        let mut turn = Turn { number: turn_number, ..Default::default() };
        let ctx = ExecutionContext { channel: "orchestrator".into(), chat_id: session_id.into(), ..Default::default() };

        loop {
            if state.cancel.load(Ordering::SeqCst) {
                return Ok(());
            }

            let messages = to_provider_messages(&session);
            let req = ChatRequest {
                messages,
                tools: Some(self.tool_definitions.clone()),
                model: None,
                max_tokens: 4096,
                temperature: 0.7,
                tool_choice: None,
                response_format: None,
            };

            let stream_id = uuid::Uuid::new_v4().to_string();
            let outcome = match self.provider.chat_stream(req).await {
                Ok(stream) => {
                    self.consume_stream(stream, &stream_id, state, sink).await?
                }
                Err(_) => {
                    // Provider doesn't support streaming; fall back to one-shot chat.
                    let req = ChatRequest {
                        messages: to_provider_messages(&session),
                        tools: Some(self.tool_definitions.clone()),
                        model: None,
                        max_tokens: 4096,
                        temperature: 0.7,
                        tool_choice: None,
                        response_format: None,
                    };
                    let resp = self
                        .provider
                        .chat_with_retry(req, Default::default())
                        .await
                        .map_err(|e| CoreError::Provider { message: e.to_string(), retryable: false })?;
                    turn.input_tokens += resp.input_tokens.unwrap_or(0);
                    turn.output_tokens += resp.output_tokens.unwrap_or(0);
                    StepOutcome {
                        text: resp.content.unwrap_or_default(),
                        tool_calls: resp.tool_calls,
                        input_tokens: resp.input_tokens.unwrap_or(0),
                        output_tokens: resp.output_tokens.unwrap_or(0),
                    }
                }
            };

            if !outcome.text.is_empty() {
                self.sessions.record_message(&mut session, "assistant", outcome.text.clone(), Default::default());
                sink.emit(ChannelEvent::AssistantMessage { content: outcome.text }).await;
            }
            turn.input_tokens += outcome.input_tokens;
            turn.output_tokens += outcome.output_tokens;

            if outcome.tool_calls.is_empty() {
                break;
            }

            for call in outcome.tool_calls {
                if state.cancel.load(Ordering::SeqCst) {
                    return Ok(());
                }
                if turn.tool_calls_made >= self.limits.max_tool_calls_per_turn {
                    return Err(CoreError::MaxToolCallsExceeded(self.limits.max_tool_calls_per_turn));
                }
                turn.tool_calls_made += 1;

                sink.emit(ChannelEvent::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.arguments.to_string(),
                })
                .await;

                let pipeline_outcome = self
                    .tools
                    .call(&call.name, call.arguments, &ctx, session_id, None, false)
                    .await
                    .map_err(|e| CoreError::Tool { tool: call.name.clone(), message: e.to_string() })?;

                let (content, is_error) = match pipeline_outcome {
                    PipelineOutcome::Completed { result, .. } => (result.content, result.is_error),
                    PipelineOutcome::NeedsApproval { approval_id } => {
                        sink.emit(ChannelEvent::ApprovalRequired {
                            id: approval_id,
                            tool: call.name.clone(),
                            action: "execute".into(),
                            target: String::new(),
                            reason: "approval required".into(),
                            is_dangerous: false,
                        })
                        .await;
                        return Ok(());
                    }
                    PipelineOutcome::Denied { reason } => (reason, true),
                };

                sink.emit(ChannelEvent::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    success: !is_error,
                    output: content.clone(),
                })
                .await;
                self.sessions.record_message(
                    &mut session,
                    "tool",
                    content,
                    [("toolCallId".to_string(), serde_json::Value::String(call.id))]
                        .into_iter()
                        .collect(),
                );
            }
        }

        self.sessions
            .save(&session)
            .await
            .map_err(|e| CoreError::Session(e.to_string()))?;

        let cost = cost::estimate_cost(self.provider.default_model(), turn.input_tokens, turn.output_tokens);
        let _ = cost;
        sink.emit(ChannelEvent::TurnComplete { turn_number }).await;
        Ok(())
    }

    async fn consume_stream(
        &self,
        mut stream: futures_util::stream::BoxStream<'static, anyhow::Result<StreamEvent>>,
        stream_id: &str,
        state: &SessionState,
        sink: &dyn ChannelSink,
    ) -> CoreResult<StepOutcome> {
        let mut assembler = ToolCallAssembler::new();
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = (0u64, 0u64);
        let mut started = false;

        while let Some(event) = stream.next().await {
            if state.cancel.load(Ordering::SeqCst) {
                break;
            }
            let event = event.map_err(|e| CoreError::Provider { message: e.to_string(), retryable: true })?;
            match event {
                StreamEvent::MessageStart { .. } => {
                    started = true;
                    sink.emit(ChannelEvent::StreamStart { stream_id: stream_id.to_string() }).await;
                }
                StreamEvent::ContentBlockStart { index, tool_id, tool_name, .. } => {
                    assembler.start_block(index, tool_id, tool_name);
                }
                StreamEvent::ContentBlockDelta { index, delta } => match delta {
                    ContentDelta::TextDelta(chunk) => {
                        text.push_str(&chunk);
                        sink.emit(ChannelEvent::StreamDelta {
                            stream_id: stream_id.to_string(),
                            delta: chunk,
                        })
                        .await;
                    }
                    ContentDelta::InputJsonDelta(chunk) => {
                        assembler.append_delta(index, &chunk);
                    }
                },
                StreamEvent::ContentBlockStop { index } => {
                    if let Some(call) = assembler.finalize_block(index) {
                        tool_calls.push(call);
                    }
                }
                StreamEvent::MessageDelta { usage: u, .. } => {
                    if let Some(u) = u {
                        usage = (u.input_tokens.unwrap_or(0), u.output_tokens.unwrap_or(0));
                    }
                }
                StreamEvent::MessageStop => break,
            }
        }

        if started {
            sink.emit(ChannelEvent::StreamEnd { stream_id: stream_id.to_string() }).await;
        }

        let failures = assembler.take_failures();
        if !failures.is_empty() {
            let (_, reason) = failures.into_iter().next().expect("checked non-empty");
            return Err(CoreError::ParseError(reason));
        }

        Ok(StepOutcome { text, tool_calls, input_tokens: usage.0, output_tokens: usage.1 })
    }
}

struct StepOutcome {
    text: String,
    tool_calls: Vec<crate::providers::base::ToolCallRequest>,
    input_tokens: u64,
    output_tokens: u64,
}

fn to_provider_messages(session: &Session) -> Vec<Message> {
    session
        .messages
        .iter()
        .map(|m| match m.role.as_str() {
            "user" => Message::user(m.content.clone()),
            "assistant" => Message::assistant(m.content.clone(), None),
            "tool" => {
                let id = m
                    .extra
                    .get("toolCallId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Message::tool_result(id, m.content.clone(), false)
            }
            _ => Message::system(m.content.clone()),
        })
        .collect()
}
