use super::*;
use crate::config::schema::Config;
use std::sync::Mutex;

// std::env mutation is process-global; serialize these tests.
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn env_override_fills_empty_api_key() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe {
        std::env::set_var("COREWARD_API_KEY", "sk-test-123");
    }
    let mut config = Config::default();
    apply_env_overrides(&mut config);
    assert_eq!(config.providers.primary.api_key, "sk-test-123");
    unsafe {
        std::env::remove_var("COREWARD_API_KEY");
    }
}

#[test]
fn env_override_ignores_empty_value() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe {
        std::env::remove_var("COREWARD_API_KEY");
    }
    let mut config = Config::default();
    config.providers.primary.api_key = "unchanged".to_string();
    apply_env_overrides(&mut config);
    assert_eq!(config.providers.primary.api_key, "unchanged");
}

#[test]
fn env_override_fills_base_url() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe {
        std::env::set_var("COREWARD_BASE_URL", "https://example.test/v1");
    }
    let mut config = Config::default();
    apply_env_overrides(&mut config);
    assert_eq!(config.providers.primary.base_url, "https://example.test/v1");
    unsafe {
        std::env::remove_var("COREWARD_BASE_URL");
    }
}

#[test]
fn credential_helper_skipped_when_command_empty() {
    let mut config = Config::default();
    apply_credential_helper(&mut config);
    assert!(config.providers.primary.api_key.is_empty());
}

#[test]
fn credential_helper_skipped_when_key_already_set() {
    let mut config = Config::default();
    config.providers.primary.api_key = "already-set".to_string();
    config.credential_helper.command = "true".to_string();
    apply_credential_helper(&mut config);
    assert_eq!(config.providers.primary.api_key, "already-set");
}

#[test]
fn detect_source_reports_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe {
        std::env::set_var("COREWARD_API_KEY", "sk-test-456");
    }
    let config = Config::default();
    assert_eq!(detect_source(&config), "env");
    unsafe {
        std::env::remove_var("COREWARD_API_KEY");
    }
}

#[test]
fn detect_source_reports_empty_when_nothing_set() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe {
        std::env::remove_var("COREWARD_API_KEY");
    }
    let config = Config::default();
    assert_eq!(detect_source(&config), "[empty]");
}

#[test]
fn detect_source_reports_config_when_only_file_has_key() {
    let _guard = ENV_LOCK.lock().unwrap();
    unsafe {
        std::env::remove_var("COREWARD_API_KEY");
    }
    let mut config = Config::default();
    config.providers.primary.api_key = "from-file".to_string();
    assert_eq!(detect_source(&config), "config");
}
