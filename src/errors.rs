#![allow(dead_code)]

use thiserror::Error;

/// Typed error hierarchy for the orchestration core.
///
/// Use at module boundaries (provider calls, tool execution, config
/// validation, sessions). Internal/leaf functions can continue using
/// `anyhow::Result` — the `Internal` variant allows seamless conversion
/// via the `?` operator.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Rate limit exceeded")]
    RateLimit { retry_after: Option<u64> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Approval denied: {0}")]
    ApprovalDenied(String),

    #[error("Approval timed out waiting for a response")]
    ApprovalTimeout,

    #[error("Blocked by policy: {0}")]
    PolicyBlocked(String),

    #[error("Sandbox failure: {0}")]
    SandboxFailure(String),

    #[error("Malformed tool call: {0}")]
    ParseError(String),

    #[error("Maximum turns exceeded ({0})")]
    MaxTurnsExceeded(u32),

    #[error("Maximum tool calls exceeded ({0})")]
    MaxToolCallsExceeded(u32),

    #[error("Session is busy")]
    Busy,

    #[error("Tool error: {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("Session error: {0}")]
    Session(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using `CoreError`.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Whether this error is retryable (rate limits, transient provider errors).
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::RateLimit { .. } => true,
            CoreError::Provider { retryable, .. } => *retryable,
            CoreError::SandboxFailure(_) => true,
            CoreError::PolicyBlocked(_) => true,
            CoreError::Internal(_) => true,
            _ => false,
        }
    }

    /// The stable error code surfaced to channels, per the outbound
    /// `error{code, message, recoverable}` event shape.
    pub fn channel_code(&self) -> &'static str {
        match self {
            CoreError::InvalidArgs(_) => "invalid_args",
            CoreError::ApprovalDenied(_) => "approval_denied",
            CoreError::ApprovalTimeout => "approval_timeout",
            CoreError::PolicyBlocked(_) => "policy_blocked",
            CoreError::SandboxFailure(_) => "sandbox_failure",
            CoreError::Provider { .. } | CoreError::RateLimit { .. } => "provider_error",
            CoreError::Auth(_) => "auth",
            CoreError::MaxTurnsExceeded(_) => "max_turns_exceeded",
            CoreError::MaxToolCallsExceeded(_) => "max_tool_calls_exceeded",
            CoreError::Busy => "busy",
            CoreError::ParseError(_) => "parse_error",
            CoreError::Config(_) | CoreError::Tool { .. } | CoreError::Session(_) => "internal",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Message text truncated and secret-scrubbed for outbound display,
    /// per the `internal` error kind's "details scrubbed ... and
    /// truncated to 500 chars" requirement. Other kinds are already
    /// safe to surface verbatim (auth excepted, which is shown as-is by
    /// design of the orchestrator).
    pub fn channel_message(&self) -> String {
        let raw = self.to_string();
        if matches!(self, CoreError::Internal(_) | CoreError::Config(_)) {
            let sanitized = crate::utils::path_sanitize::sanitize_error_message(&raw, None);
            crate::utils::truncate_chars(&sanitized, 500, "...")
        } else {
            raw
        }
    }
}
