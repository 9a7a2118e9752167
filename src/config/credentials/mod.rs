use super::schema::{Config, CredentialHelperConfig};
use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Credential override precedence: env > credential helper > OS keyring >
/// config file. Only the primary provider and its fallbacks carry secrets
/// in this trimmed-down config surface — the channel/skill credential
/// slots of the teacher's full config are out of scope here.

/// Apply `COREWARD_API_KEY` / `COREWARD_BASE_URL` env var overrides to the
/// primary provider. Any non-empty value wins over the config file,
/// allowing secrets to be injected without touching disk (containers, CI).
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("COREWARD_API_KEY") {
        if !val.is_empty() {
            config.providers.primary.api_key = val;
        }
    }
    if let Ok(val) = std::env::var("COREWARD_BASE_URL") {
        if !val.is_empty() {
            config.providers.primary.base_url = val;
        }
    }
}

/// Apply credential helper overrides. Only fills the primary provider's
/// API key, and only if still empty after env var overrides.
pub fn apply_credential_helper(config: &mut Config) {
    let helper = config.credential_helper.clone();
    if helper.command.is_empty() || !config.providers.primary.api_key.is_empty() {
        return;
    }

    match fetch_from_helper(&helper, "provider-api-key") {
        Ok(value) if !value.is_empty() => {
            debug!("loaded provider API key from credential helper");
            config.providers.primary.api_key = value;
        }
        Ok(_) => {}
        Err(e) => warn!("credential helper failed for provider-api-key: {e}"),
    }
}

fn fetch_from_helper(helper: &CredentialHelperConfig, key: &str) -> Result<String> {
    let format = if helper.format.is_empty() {
        "json"
    } else {
        &helper.format
    };

    match format {
        "1password" => {
            let mut args = vec!["read".to_string(), format!("op://coreward/{key}")];
            args.extend(helper.args.iter().cloned());
            run_helper_process("op", &args, None)
        }
        "bitwarden" => {
            let mut args = vec![
                "get".to_string(),
                "password".to_string(),
                format!("coreward/{key}"),
            ];
            args.extend(helper.args.iter().cloned());
            run_helper_process("bw", &args, None)
        }
        "line" => {
            let mut args = helper.args.clone();
            args.push(key.to_string());
            run_helper_process(&helper.command, &args, None)
        }
        // "json" or any unrecognized format
        _ => {
            let stdin_data = serde_json::json!({"action": "get", "key": key}).to_string();
            let output = run_helper_process(&helper.command, &helper.args, Some(&stdin_data))?;
            let parsed: serde_json::Value =
                serde_json::from_str(&output).context("credential helper returned invalid JSON")?;
            Ok(parsed["value"].as_str().unwrap_or("").to_string())
        }
    }
}

fn run_helper_process(cmd: &str, args: &[String], stdin_data: Option<&str>) -> Result<String> {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {cmd}"))?;

    if let Some(data) = stdin_data
        && let Some(mut stdin) = child.stdin.take()
    {
        stdin.write_all(data.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("exited with {}: {}", output.status, stderr.trim())
    }
}

// ---------------------------------------------------------------------------
// Keyring — OS keychain credential storage for the primary provider key
// ---------------------------------------------------------------------------

const KEYRING_SERVICE: &str = "coreward";
const KEYRING_PROVIDER_KEY_SLOT: &str = "provider-api-key";

#[cfg(feature = "keyring-store")]
pub fn apply_keyring_overrides(config: &mut Config) {
    if !config.providers.primary.api_key.is_empty() {
        return;
    }
    let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_PROVIDER_KEY_SLOT) else {
        debug!("keyring unavailable for provider API key");
        return;
    };
    if let Ok(secret) = entry.get_password() {
        if !secret.is_empty() {
            debug!("loaded provider API key from keyring");
            config.providers.primary.api_key = secret;
        }
    }
}

#[cfg(feature = "keyring-store")]
pub fn keyring_set(value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_PROVIDER_KEY_SLOT)
        .context("keyring unavailable")?;
    entry
        .set_password(value)
        .context("failed to store credential in keyring")?;
    Ok(())
}

#[cfg(feature = "keyring-store")]
pub fn keyring_delete() -> Result<()> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_PROVIDER_KEY_SLOT)
        .context("keyring unavailable")?;
    entry
        .delete_credential()
        .context("failed to delete credential from keyring")?;
    Ok(())
}

#[cfg(feature = "keyring-store")]
pub fn keyring_has() -> bool {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_PROVIDER_KEY_SLOT)
        .ok()
        .and_then(|e| e.get_password().ok())
        .is_some_and(|s| !s.is_empty())
}

/// Detect which backend provided the primary provider's API key, for the
/// `coreward doctor` report.
pub fn detect_source(config: &Config) -> &'static str {
    if let Ok(val) = std::env::var("COREWARD_API_KEY") {
        if !val.is_empty() {
            return "env";
        }
    }

    #[cfg(feature = "keyring-store")]
    if keyring_has() {
        return "keyring";
    }

    if !config.providers.primary.api_key.is_empty() {
        if !config.credential_helper.command.is_empty() {
            return "config/helper";
        }
        return "config";
    }

    "[empty]"
}

#[cfg(test)]
mod tests;
