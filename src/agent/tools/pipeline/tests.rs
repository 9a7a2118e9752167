use super::*;
use crate::agent::tools::base::ExecutionContext;
use crate::agent::tools::capability::{ApprovalCapability, AuditCapability, ExecutionCapability, LabelCapability};
use crate::agent::tools::{Tool, ToolResult};
use crate::approval::{ApprovalChannel, ApprovalLevel, ApprovalOutcome as Outcome, NullAuditSink};
use async_trait::async_trait;
use serde_json::json;

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes input"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
    }
    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::new(params["text"].as_str().unwrap_or("").to_string()))
    }
}

struct AlwaysGrant;
#[async_trait]
impl ApprovalChannel for AlwaysGrant {
    async fn prompt(&self, _req: &ApprovalRequest) -> Outcome {
        Outcome::Granted
    }
}

struct AlwaysDeny;
#[async_trait]
impl ApprovalChannel for AlwaysDeny {
    async fn prompt(&self, _req: &ApprovalRequest) -> Outcome {
        Outcome::Denied
    }
}

fn make_pipeline(approvals: ApprovalManager, capability: ToolCapability) -> ToolPipeline {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));
    let mut caps = HashMap::new();
    caps.insert("echo".to_string(), capability);
    ToolPipeline::new(
        Arc::new(registry),
        caps,
        Arc::new(approvals),
        Arc::new(NetworkGuard::new(crate::config::NetworkGuardConfig::default())),
    )
}

#[tokio::test]
async fn invalid_args_are_denied_before_execution() {
    let approvals = ApprovalManager::new(Box::new(AlwaysGrant), Box::new(NullAuditSink));
    let pipeline = make_pipeline(approvals, ToolCapability::default());
    let outcome = pipeline
        .call("echo", json!({}), &ExecutionContext::default(), "sess-1", None, false)
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Denied { .. }));
}

#[tokio::test]
async fn auto_level_executes_without_prompting() {
    let approvals = ApprovalManager::new(Box::new(AlwaysDeny), Box::new(NullAuditSink));
    let cap = ToolCapability {
        name: "echo".into(),
        approval: ApprovalCapability { level: ApprovalLevel::Auto, ..Default::default() },
        ..Default::default()
    };
    let pipeline = make_pipeline(approvals, cap);
    let outcome = pipeline
        .call("echo", json!({"text": "hi"}), &ExecutionContext::default(), "sess-1", None, false)
        .await
        .unwrap();
    match outcome {
        PipelineOutcome::Completed { result, .. } => assert_eq!(result.content, "hi"),
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn ask_level_denied_by_channel_is_refused() {
    let approvals = ApprovalManager::new(Box::new(AlwaysDeny), Box::new(NullAuditSink));
    let cap = ToolCapability {
        name: "echo".into(),
        approval: ApprovalCapability { level: ApprovalLevel::Ask, ..Default::default() },
        ..Default::default()
    };
    let pipeline = make_pipeline(approvals, cap);
    let outcome = pipeline
        .call("echo", json!({"text": "hi"}), &ExecutionContext::default(), "sess-1", None, false)
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Denied { .. }));
}

#[tokio::test]
async fn ask_level_granted_by_channel_executes() {
    let approvals = ApprovalManager::new(Box::new(AlwaysGrant), Box::new(NullAuditSink));
    let cap = ToolCapability {
        name: "echo".into(),
        approval: ApprovalCapability { level: ApprovalLevel::Ask, ..Default::default() },
        ..Default::default()
    };
    let pipeline = make_pipeline(approvals, cap);
    let outcome = pipeline
        .call("echo", json!({"text": "hi"}), &ExecutionContext::default(), "sess-1", None, false)
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Completed { .. }));
}

#[tokio::test]
async fn output_over_cap_is_truncated() {
    let approvals = ApprovalManager::new(Box::new(AlwaysGrant), Box::new(NullAuditSink));
    let cap = ToolCapability {
        name: "echo".into(),
        execution: ExecutionCapability { output_cap: 5, ..Default::default() },
        ..Default::default()
    };
    let pipeline = make_pipeline(approvals, cap);
    let outcome = pipeline
        .call("echo", json!({"text": "0123456789"}), &ExecutionContext::default(), "sess-1", None, false)
        .await
        .unwrap();
    match outcome {
        PipelineOutcome::Completed { result, .. } => assert!(result.content.contains("TRUNCATED")),
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn capability_validate_rejects_invalid_combination_before_running() {
    let approvals = ApprovalManager::new(Box::new(AlwaysGrant), Box::new(NullAuditSink));
    let cap = ToolCapability {
        name: "echo".into(),
        audit: AuditCapability { log_args: true, log_output: true },
        labels: LabelCapability::default(),
        output_may_contain_external_content: true,
        ..Default::default()
    };
    let pipeline = make_pipeline(approvals, cap);
    let outcome = pipeline
        .call("echo", json!({"text": "hi"}), &ExecutionContext::default(), "sess-1", None, false)
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Denied { .. }));
}
