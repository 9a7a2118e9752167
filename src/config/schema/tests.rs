use super::*;

#[test]
fn default_config_validates() {
    let config = Config::default();
    assert!(config.validate().is_ok());
}

#[test]
fn zero_max_tokens_rejected() {
    let mut config = Config::default();
    config.agents.defaults.max_tokens = 0;
    assert!(config.validate().is_err());
}

#[test]
fn temperature_out_of_range_rejected() {
    let mut config = Config::default();
    config.agents.defaults.temperature = 3.0;
    assert!(config.validate().is_err());
}

#[test]
fn empty_allowlist_host_rejected() {
    let mut config = Config::default();
    config.network_guard.allowlist.push(NetworkAllowEntry {
        host: String::new(),
        methods: vec!["GET".to_string()],
    });
    assert!(config.validate().is_err());
}

#[test]
fn zero_failure_threshold_rejected() {
    let mut config = Config::default();
    config.circuit_breaker.failure_threshold = 0;
    assert!(config.validate().is_err());
}

#[test]
fn workspace_path_expands_tilde() {
    let config = Config::default();
    let path = config.workspace_path();
    assert!(!path.to_string_lossy().starts_with('~'));
}
