//! The tool enforcement pipeline (§4.6, C6) — the single choke point
//! every tool call passes through: validate → approvals → network guard
//! → execute → redact → truncate → label → audit.
//!
//! Wraps [`super::registry::ToolRegistry`] (which still owns caching,
//! panic-guarded execution, and per-tool timeouts) with the capability-
//! driven policy steps the registry alone doesn't know about.

use super::capability::{canonical_approval_id, is_known_safe_host, ToolCapability};
use super::registry::ToolRegistry;
use super::{ExecutionContext, ToolResult};
use crate::approval::{ApprovalManager, ApprovalOutcome, ApprovalRequest};
use crate::audit::{AuditLogger, Severity};
use crate::labels::{label_output, ContentLabel, SecretDetector};
use crate::net_guard::NetworkGuard;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// The outcome of routing one tool call through the full pipeline.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The call completed (successfully or not); `result` already has
    /// findings redacted, truncation applied, and reflects
    /// `capability.execution.output_cap`.
    Completed { result: ToolResult, label: ContentLabel },
    /// Approval is required and has not yet been granted; the caller
    /// (orchestrator) should transition to `waiting_approval` and retry
    /// once the approval manager resolves it.
    NeedsApproval { approval_id: String },
    /// The call was refused before execution (invalid args, denied
    /// approval, or a network-guard rejection).
    Denied { reason: String },
}

pub struct ToolPipeline {
    registry: Arc<ToolRegistry>,
    capabilities: HashMap<String, ToolCapability>,
    approvals: Arc<ApprovalManager>,
    network_guard: Arc<NetworkGuard>,
    detector: SecretDetector,
    audit: Option<Arc<AuditLogger>>,
}

impl ToolPipeline {
    pub fn new(
        registry: Arc<ToolRegistry>,
        capabilities: HashMap<String, ToolCapability>,
        approvals: Arc<ApprovalManager>,
        network_guard: Arc<NetworkGuard>,
    ) -> Self {
        Self {
            registry,
            capabilities,
            approvals,
            network_guard,
            detector: SecretDetector::new(),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn emit_audit(&self, category: &str, action: &str, severity: Severity, metadata: serde_json::Value) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log(category, action, severity, metadata) {
                tracing::warn!("failed to write tool audit entry: {e}");
            }
        }
    }

    /// Run one tool call through the full enforcement pipeline.
    ///
    /// `session_id` scopes approval grants; `target_host` is the network
    /// destination this call would hit, if any (tools without a network
    /// capability pass `None`); `approval_already_granted` lets the
    /// orchestrator retry a call whose approval it already resolved
    /// out-of-band (`waiting_approval` → `processing`) without re-asking.
    pub async fn call(
        &self,
        tool_name: &str,
        args: Value,
        ctx: &ExecutionContext,
        session_id: &str,
        target_host: Option<&str>,
        approval_already_granted: bool,
    ) -> Result<PipelineOutcome> {
        let started = Instant::now();

        // Step 1: validate args against the tool's declared schema.
        let Some(tool) = self.registry.get(tool_name) else {
            return Ok(PipelineOutcome::Denied { reason: format!("unknown tool '{tool_name}'") });
        };
        let schema = tool.parameters();
        if let Ok(compiled) = jsonschema::validator_for(&schema) {
            if let Err(err) = compiled.validate(&args) {
                self.emit_audit(
                    "tool",
                    "tool_denied",
                    Severity::Warning,
                    serde_json::json!({"tool": tool_name, "reason": "invalid_args", "detail": err.to_string()}),
                );
                return Ok(PipelineOutcome::Denied { reason: format!("invalid_args: {err}") });
            }
        }

        let capability = self.capabilities.get(tool_name).cloned().unwrap_or_default();
        if let Err(reason) = capability.validate() {
            return Ok(PipelineOutcome::Denied { reason });
        }

        // Step 2/3: compute and resolve required approvals.
        if !approval_already_granted {
            let normalized_target = target_host.unwrap_or("local").to_lowercase();
            let approval_id =
                canonical_approval_id(tool_name, None, "execute", &normalized_target);

            let escalated = capability.approval.danger_patterns.iter().any(|p| args.to_string().contains(p))
                || (capability.approval.unknown_host_requires_approval
                    && target_host
                        .map(|h| {
                            !capability
                                .network
                                .as_ref()
                                .is_some_and(|net| is_known_safe_host(net, h))
                        })
                        .unwrap_or(false));

            let needs_ask = escalated
                || !matches!(capability.approval.level, crate::approval::ApprovalLevel::Auto);

            if needs_ask {
                let summary = self.detector.redact(&format!("{tool_name} {args}"));
                let req = ApprovalRequest::new(
                    approval_id.clone(),
                    session_id,
                    tool_name,
                    capability.approval.level,
                    summary,
                );
                match self.approvals.request(req).await {
                    ApprovalOutcome::Granted => {}
                    ApprovalOutcome::Denied => {
                        self.emit_audit(
                            "tool",
                            "tool_denied",
                            Severity::Warning,
                            serde_json::json!({"tool": tool_name, "reason": "approval_denied"}),
                        );
                        return Ok(PipelineOutcome::Denied { reason: "approval denied".into() });
                    }
                }
            }
        }

        // Step 4: network guard for network-capable tools.
        if let (Some(net), Some(host)) = (&capability.network, target_host) {
            let scheme_url = format!("https://{host}/");
            let decision = self.network_guard.check(&scheme_url, "GET").await;
            if !decision.is_allowed() {
                let reason = match decision {
                    crate::net_guard::GuardDecision::Blocked { reason } => reason,
                    crate::net_guard::GuardDecision::Allowed => unreachable!(),
                };
                self.emit_audit(
                    "tool",
                    "tool_denied",
                    Severity::Warning,
                    serde_json::json!({"tool": tool_name, "reason": "network_guard", "detail": reason}),
                );
                return Ok(PipelineOutcome::Denied { reason });
            }
            let _ = net; // network capability is consulted for policy shape; NetworkGuard owns the live DNS/IP checks.
        }

        // Step 5: execute.
        let mut result = self.registry.execute(tool_name, args, ctx).await?;

        // Step 6: redact raw output (I-T1).
        let findings = self.detector.scan(&result.content);
        if !findings.is_empty() {
            result.content = self.detector.redact(&result.content);
        }

        // Step 7: truncate (capability-specific byte cap).
        if result.content.len() > capability.execution.output_cap {
            let omitted = result.content.len() - capability.execution.output_cap;
            result.content.truncate(capability.execution.output_cap);
            result.content.push_str(&format!("\n[TRUNCATED: {omitted} bytes omitted]"));
        }

        // Step 8: label.
        let label = label_output(
            capability.labels.output_trust,
            capability.labels.output_data_class,
            &findings,
            tool_name,
        );

        // Step 9: audit.
        let elapsed_ms = started.elapsed().as_millis();
        self.emit_audit(
            "tool",
            "tool_executed",
            if result.is_error { Severity::Warning } else { Severity::Info },
            serde_json::json!({
                "tool": tool_name,
                "success": !result.is_error,
                "findingsCount": findings.len(),
                "dataClass": format!("{:?}", label.data_class).to_lowercase(),
                "trustLevel": format!("{:?}", label.trust_level).to_lowercase(),
                "truncated": result.content.contains("[TRUNCATED:"),
                "executionTimeMs": elapsed_ms,
            }),
        );

        Ok(PipelineOutcome::Completed { result, label })
    }
}

#[cfg(test)]
mod tests;
