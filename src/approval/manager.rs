//! Channel-mediated approval manager (§4.7, C7).
//!
//! Sits between the tool executor and whatever surface the user is
//! talking through (CLI prompt, chat-app interactive element, ...). It
//! deduplicates identical in-flight requests, remembers session-scoped
//! grants, and never sees or forwards tool output or file contents —
//! only a human-readable summary.

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Mirrors a tool capability's base approval level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalLevel {
    /// No prompt; the call proceeds unconditionally.
    Auto,
    /// Prompt once per session; the grant is remembered for the rest of it.
    Ask,
    /// Prompt every time; a grant is one-shot and never cached.
    Always,
}

/// One approval ask. `id` is the canonical id the tool executor computed
/// for this call (see §4.6 step 2); for `level: Always` the caller must
/// mint a fresh id per call so grants never survive past one use.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub level: ApprovalLevel,
    /// Human-readable summary shown to the approver. Must already be
    /// redacted by the caller — this manager does not sanitize it.
    pub summary: String,
    pub timeout: Duration,
}

impl ApprovalRequest {
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        level: ApprovalLevel,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            level,
            summary: summary.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Granted,
    Denied,
}

/// A surface capable of presenting an approval ask to a human and
/// collecting their decision. CLI, chat-bot, and test implementations
/// all live behind this trait; the manager itself is transport-agnostic.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn prompt(&self, req: &ApprovalRequest) -> ApprovalOutcome;
}

/// Audit events the manager emits. Payloads are intentionally narrow —
/// never tool output or file contents, per §4.7.
#[derive(Debug, Clone)]
pub enum ApprovalAuditEvent {
    Requested { session_id: String, tool_name: String, approval_id: String },
    Granted { session_id: String, tool_name: String, approval_id: String },
    Denied { session_id: String, tool_name: String, approval_id: String },
    Timeout { session_id: String, tool_name: String, approval_id: String },
}

/// Sink for approval audit events. The concrete audit logger implements
/// this; kept as a trait here so this module doesn't depend on it.
pub trait ApprovalAuditSink: Send + Sync {
    fn emit(&self, event: ApprovalAuditEvent);
}

/// A sink that drops every event, for callers that don't wire audit yet.
pub struct NullAuditSink;

impl ApprovalAuditSink for NullAuditSink {
    fn emit(&self, _event: ApprovalAuditEvent) {}
}

/// Wires approval events into the real audit logger. Payloads carry only
/// session id, tool name, and approval id — never tool output or file
/// contents, matching §4.7.
pub struct AuditLogSink(pub std::sync::Arc<crate::audit::AuditLogger>);

impl ApprovalAuditSink for AuditLogSink {
    fn emit(&self, event: ApprovalAuditEvent) {
        let (action, session_id, tool_name, approval_id) = match event {
            ApprovalAuditEvent::Requested { session_id, tool_name, approval_id } => {
                ("approval_requested", session_id, tool_name, approval_id)
            }
            ApprovalAuditEvent::Granted { session_id, tool_name, approval_id } => {
                ("approval_granted", session_id, tool_name, approval_id)
            }
            ApprovalAuditEvent::Denied { session_id, tool_name, approval_id } => {
                ("approval_denied", session_id, tool_name, approval_id)
            }
            ApprovalAuditEvent::Timeout { session_id, tool_name, approval_id } => {
                ("approval_timeout", session_id, tool_name, approval_id)
            }
        };
        if let Err(e) = self.0.log(
            "approval",
            action,
            crate::audit::Severity::Info,
            serde_json::json!({
                "sessionId": session_id,
                "tool": tool_name,
                "approvalId": approval_id,
            }),
        ) {
            warn!("failed to write approval audit entry: {e}");
        }
    }
}

enum InFlight {
    /// A request for this id is being prompted; late arrivals subscribe
    /// to the broadcast channel and await the same outcome.
    Pending(broadcast::Sender<ApprovalOutcome>),
}

#[derive(Default)]
struct ManagerState {
    /// `level=auto|ask` grants, keyed by `session_id\u{0}id`, scoped to
    /// the session and never expired explicitly — a session ending
    /// (dropping its state) is the only way a grant disappears.
    granted: HashSet<String>,
    in_flight: std::collections::HashMap<String, InFlight>,
}

fn grant_key(session_id: &str, id: &str) -> String {
    format!("{session_id}\u{0}{id}")
}

/// Deduplicated, channel-mediated approval requests with timeout.
pub struct ApprovalManager {
    channel: Box<dyn ApprovalChannel>,
    audit: Box<dyn ApprovalAuditSink>,
    state: Mutex<ManagerState>,
}

impl ApprovalManager {
    pub fn new(channel: Box<dyn ApprovalChannel>, audit: Box<dyn ApprovalAuditSink>) -> Self {
        Self {
            channel,
            audit,
            state: Mutex::new(ManagerState::default()),
        }
    }

    pub fn with_null_audit(channel: Box<dyn ApprovalChannel>) -> Self {
        Self::new(channel, Box::new(NullAuditSink))
    }

    /// Resolve one approval request. Returns `true` if granted.
    ///
    /// For `level=auto`, grants and audits immediately without touching
    /// the channel. For `level=ask`, a prior grant for the same
    /// `(session_id, id)` short-circuits to granted. For `level=always`,
    /// every call prompts — callers are expected to mint a fresh `id`
    /// per call so there is nothing to look up.
    pub async fn request(&self, req: ApprovalRequest) -> ApprovalOutcome {
        if req.level == ApprovalLevel::Auto {
            self.audit.emit(ApprovalAuditEvent::Granted {
                session_id: req.session_id.clone(),
                tool_name: req.tool_name.clone(),
                approval_id: req.id.clone(),
            });
            return ApprovalOutcome::Granted;
        }

        let key = grant_key(&req.session_id, &req.id);

        if req.level == ApprovalLevel::Ask {
            let state = self.state.lock().await;
            if state.granted.contains(&key) {
                return ApprovalOutcome::Granted;
            }
        }

        // Join an in-flight request for the same id rather than prompting twice.
        let mut rx = {
            let mut state = self.state.lock().await;
            match state.in_flight.get(&key) {
                Some(InFlight::Pending(tx)) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    state.in_flight.insert(key.clone(), InFlight::Pending(tx));
                    None
                }
            }
        };

        if let Some(rx) = rx.as_mut() {
            return match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => ApprovalOutcome::Denied,
            };
        }

        self.audit.emit(ApprovalAuditEvent::Requested {
            session_id: req.session_id.clone(),
            tool_name: req.tool_name.clone(),
            approval_id: req.id.clone(),
        });

        let outcome = match tokio::time::timeout(req.timeout, self.channel.prompt(&req)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(id = %req.id, tool = %req.tool_name, "approval request timed out");
                self.audit.emit(ApprovalAuditEvent::Timeout {
                    session_id: req.session_id.clone(),
                    tool_name: req.tool_name.clone(),
                    approval_id: req.id.clone(),
                });
                ApprovalOutcome::Denied
            }
        };

        match outcome {
            ApprovalOutcome::Granted => {
                info!(id = %req.id, tool = %req.tool_name, "approval granted");
                self.audit.emit(ApprovalAuditEvent::Granted {
                    session_id: req.session_id.clone(),
                    tool_name: req.tool_name.clone(),
                    approval_id: req.id.clone(),
                });
            }
            ApprovalOutcome::Denied => {
                self.audit.emit(ApprovalAuditEvent::Denied {
                    session_id: req.session_id.clone(),
                    tool_name: req.tool_name.clone(),
                    approval_id: req.id.clone(),
                });
            }
        }

        let mut state = self.state.lock().await;
        if outcome == ApprovalOutcome::Granted && req.level == ApprovalLevel::Ask {
            state.granted.insert(key.clone());
        }
        if let Some(InFlight::Pending(tx)) = state.in_flight.remove(&key) {
            let _ = tx.send(outcome);
        }

        outcome
    }

    /// Clear every session-scoped grant for `session_id`, e.g. on logout.
    pub async fn clear_session(&self, session_id: &str) {
        let prefix = format!("{session_id}\u{0}");
        let mut state = self.state.lock().await;
        state.granted.retain(|k| !k.starts_with(&prefix));
    }

    /// True if `(session_id, id)` has an outstanding `ask`-level grant.
    pub async fn is_granted(&self, session_id: &str, id: &str) -> bool {
        self.state.lock().await.granted.contains(&grant_key(session_id, id))
    }
}
