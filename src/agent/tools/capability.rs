//! Tool capability schema (§3, §4.6, C6) — the declarative metadata the
//! enforcement pipeline reads to decide approvals, network policy,
//! sandbox level, and audit verbosity for a tool call, independent of
//! the tool's own implementation.
//!
//! Separate from [`super::base::ToolCapabilities`], which is older,
//! narrower metadata (`built_in`, `subagent_access`) the teacher's
//! subagent builder and MCP trust filter already consume; a tool
//! declares both where it needs both.

use crate::labels::{DataClass, TrustLevel};
use std::collections::HashSet;

/// One action a tool can perform. Canonical approval ids are derived as
/// `tool:[category:]action:normalized_target` (I-A1).
#[derive(Debug, Clone)]
pub struct ActionCapability {
    pub name: &'static str,
    pub category: Option<&'static str>,
    pub affects_others: bool,
    pub is_destructive: bool,
    pub has_financial_impact: bool,
}

/// Base approval policy plus the per-condition escalations §4.6 step 2
/// folds in before computing a call's required approvals.
#[derive(Debug, Clone)]
pub struct ApprovalCapability {
    pub level: crate::approval::ApprovalLevel,
    /// Argument substrings that force an approval regardless of `level`
    /// (e.g. `rm -rf`, `sudo`).
    pub danger_patterns: Vec<&'static str>,
    /// HTTP methods that always require approval for this tool
    /// (e.g. a read-mostly tool that still needs a confirm on `DELETE`).
    pub method_requires_approval: Vec<&'static str>,
    /// If true, a destination host not already in a known-safe set
    /// requires approval even when `level=auto`.
    pub unknown_host_requires_approval: bool,
}

impl Default for ApprovalCapability {
    fn default() -> Self {
        Self {
            level: crate::approval::ApprovalLevel::Auto,
            danger_patterns: vec![],
            method_requires_approval: vec![],
            unknown_host_requires_approval: false,
        }
    }
}

/// Network egress policy for a network-capable tool.
#[derive(Debug, Clone)]
pub struct NetworkCapability {
    pub mode: NetworkMode,
    pub allowed_hosts: Vec<String>,
    pub blocked_hosts: Vec<String>,
    pub blocked_ports: Vec<u16>,
    pub block_private_ips: bool,
    pub block_metadata_endpoints: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Allowlist,
    Blocklist,
}

impl Default for NetworkCapability {
    fn default() -> Self {
        Self {
            mode: NetworkMode::Blocklist,
            allowed_hosts: vec![],
            blocked_hosts: vec![],
            blocked_ports: vec![],
            block_private_ips: true,
            block_metadata_endpoints: true,
        }
    }
}

/// Execution isolation requirements.
#[derive(Debug, Clone)]
pub struct ExecutionCapability {
    pub sandbox: crate::sandbox_exec::SandboxLevel,
    pub network_default: bool,
    pub output_cap: usize,
}

impl Default for ExecutionCapability {
    fn default() -> Self {
        Self {
            sandbox: crate::sandbox_exec::SandboxLevel::None,
            network_default: false,
            output_cap: 10_000,
        }
    }
}

/// Default output labelling for content this tool produces.
#[derive(Debug, Clone)]
pub struct LabelCapability {
    pub output_trust: TrustLevel,
    pub output_data_class: DataClass,
    /// Whether this tool's inputs may themselves carry untrusted content
    /// (e.g. web content piped in from another tool) without requiring
    /// FC-4 confirmation.
    pub accepts_untrusted: bool,
}

impl Default for LabelCapability {
    fn default() -> Self {
        Self {
            output_trust: TrustLevel::Verified,
            output_data_class: DataClass::Internal,
            accepts_untrusted: false,
        }
    }
}

/// Audit verbosity for this tool's executions.
#[derive(Debug, Clone, Copy)]
pub struct AuditCapability {
    pub log_args: bool,
    /// `true` is forbidden for tools whose output may contain external
    /// content (§3) — [`ToolCapability::validate`] rejects that
    /// combination rather than silently downgrading it.
    pub log_output: bool,
}

impl Default for AuditCapability {
    fn default() -> Self {
        Self { log_args: true, log_output: false }
    }
}

/// The full declarative capability schema for one tool (§3).
#[derive(Debug, Clone, Default)]
pub struct ToolCapability {
    pub name: String,
    pub actions: Vec<ActionCapability>,
    pub approval: ApprovalCapability,
    pub network: Option<NetworkCapability>,
    pub execution: ExecutionCapability,
    pub labels: LabelCapability,
    pub audit: AuditCapability,
    /// Output may contain content fetched from outside this process
    /// (web pages, other tools' output). Combined with `audit.log_output`
    /// by [`ToolCapability::validate`].
    pub output_may_contain_external_content: bool,
}

impl ToolCapability {
    /// Reject capability declarations that violate §3's hard rule:
    /// `logOutput=true` is forbidden for tools whose output may contain
    /// external content.
    pub fn validate(&self) -> Result<(), String> {
        if self.audit.log_output && self.output_may_contain_external_content {
            return Err(format!(
                "tool '{}' declares logOutput=true with output_may_contain_external_content=true; \
                 this combination is forbidden (§3)",
                self.name
            ));
        }
        Ok(())
    }

    /// Find the declared action capability matching `action_name`, if any.
    pub fn action(&self, action_name: &str) -> Option<&ActionCapability> {
        self.actions.iter().find(|a| a.name == action_name)
    }
}

/// Canonical approval id: `tool:[category:]action:normalized_target`
/// (I-A1). `normalized_target` should already be lowercased/trimmed by
/// the caller so two logically identical calls collide.
pub fn canonical_approval_id(tool: &str, category: Option<&str>, action: &str, normalized_target: &str) -> String {
    match category {
        Some(category) => format!("{tool}:{category}:{action}:{normalized_target}"),
        None => format!("{tool}:{action}:{normalized_target}"),
    }
}

/// A small set of hosts considered "known safe" for the
/// `unknown_host_requires_approval` escalation — hosts a tool's own
/// declared `network.allowed_hosts` already vouch for.
pub fn is_known_safe_host(capability: &NetworkCapability, host: &str) -> bool {
    let allowed: HashSet<&str> = capability.allowed_hosts.iter().map(String::as_str).collect();
    allowed.contains(host)
}

#[cfg(test)]
mod tests;
