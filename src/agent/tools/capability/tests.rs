use super::*;

#[test]
fn validate_rejects_log_output_with_external_content() {
    let cap = ToolCapability {
        name: "web_fetch".into(),
        audit: AuditCapability { log_args: true, log_output: true },
        output_may_contain_external_content: true,
        ..Default::default()
    };
    assert!(cap.validate().is_err());
}

#[test]
fn validate_allows_log_output_without_external_content() {
    let cap = ToolCapability {
        name: "internal_tool".into(),
        audit: AuditCapability { log_args: true, log_output: true },
        output_may_contain_external_content: false,
        ..Default::default()
    };
    assert!(cap.validate().is_ok());
}

#[test]
fn canonical_approval_id_includes_category_when_present() {
    assert_eq!(
        canonical_approval_id("shell", Some("fs"), "delete", "/tmp/foo"),
        "shell:fs:delete:/tmp/foo"
    );
    assert_eq!(canonical_approval_id("shell", None, "delete", "/tmp/foo"), "shell:delete:/tmp/foo");
}

#[test]
fn action_lookup_finds_declared_action() {
    let cap = ToolCapability {
        name: "shell".into(),
        actions: vec![ActionCapability {
            name: "run",
            category: None,
            affects_others: false,
            is_destructive: true,
            has_financial_impact: false,
        }],
        ..Default::default()
    };
    assert!(cap.action("run").is_some());
    assert!(cap.action("missing").is_none());
}

#[test]
fn known_safe_host_checks_allowed_hosts() {
    let net = NetworkCapability { allowed_hosts: vec!["api.example.com".into()], ..Default::default() };
    assert!(is_known_safe_host(&net, "api.example.com"));
    assert!(!is_known_safe_host(&net, "evil.example.com"));
}
