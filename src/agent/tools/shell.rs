use crate::agent::tools::base::ExecutionContext;
use crate::agent::tools::{Tool, ToolResult, ToolVersion};
use crate::sandbox_exec::{ExecRequest, SandboxExecutor, SandboxLevel};
use crate::utils::regex::compile_security_patterns;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct ExecTool {
    timeout: u64,
    working_dir: Option<PathBuf>,
    deny_patterns: Vec<Regex>,
    allowed_commands: Vec<String>,
    restrict_to_workspace: bool,
    sandbox: Arc<SandboxExecutor>,
    sandbox_level: SandboxLevel,
    network_allowed: bool,
}

impl ExecTool {
    pub fn new(
        timeout: u64,
        working_dir: Option<PathBuf>,
        restrict_to_workspace: bool,
        allowed_commands: Vec<String>,
        sandbox: Arc<SandboxExecutor>,
    ) -> Result<Self> {
        Self::with_sandbox_level(
            timeout,
            working_dir,
            restrict_to_workspace,
            allowed_commands,
            sandbox,
            SandboxLevel::Process,
            false,
        )
    }

    /// Like `new`, but lets the caller override the isolation level and
    /// network policy (e.g. `sandbox_exec::ExecutionCapability` declared
    /// for this tool) instead of the `process`/no-network default.
    pub fn with_sandbox_level(
        timeout: u64,
        working_dir: Option<PathBuf>,
        restrict_to_workspace: bool,
        allowed_commands: Vec<String>,
        sandbox: Arc<SandboxExecutor>,
        sandbox_level: SandboxLevel,
        network_allowed: bool,
    ) -> Result<Self> {
        let deny_patterns = compile_security_patterns()
            .context("Failed to compile security patterns for exec tool")?;

        Ok(Self {
            timeout,
            working_dir,
            deny_patterns,
            allowed_commands,
            restrict_to_workspace,
            sandbox,
            sandbox_level,
            network_allowed,
        })
    }

    /// Known prefix commands that wrap another command.
    const PREFIX_COMMANDS: &'static [&'static str] = &[
        "sudo", "env", "command", "nohup", "nice", "time", "doas", "xargs",
    ];

    /// Extract the base command name from a shell command string.
    /// Handles leading env vars (FOO=bar cmd), sudo/command prefixes,
    /// and returns the first actual executable token.
    fn extract_command_name(token: &str) -> &str {
        let token = token.trim();
        let parts: Vec<&str> = token.split_whitespace().collect();
        let mut found_prefix = false;
        for part in &parts {
            // Skip env var assignments (KEY=value)
            if part.contains('=') && !part.starts_with('-') {
                continue;
            }
            // Skip flags (e.g., sudo -u root, env -i, nice -n 10)
            if found_prefix && part.starts_with('-') {
                continue;
            }
            // Get basename in case of full path like /usr/bin/ls
            let name = part.rsplit('/').next().unwrap_or(part);
            // Skip known prefix commands to find the actual command
            if Self::PREFIX_COMMANDS.contains(&name) {
                found_prefix = true;
                continue;
            }
            return name;
        }
        token
    }

    /// Extract all command names from a shell pipeline/chain.
    /// Splits on |, &&, ||, ;, and newlines to find each command.
    fn extract_all_commands(command: &str) -> Vec<&str> {
        // Split on shell operators: |, &&, ||, ;, \n
        // We need to handle these carefully to extract command names
        let mut commands = Vec::new();
        let mut remaining = command;

        while !remaining.is_empty() {
            // Find the next shell operator
            let next_split = remaining
                .find("&&")
                .map(|i| (i, 2))
                .into_iter()
                .chain(remaining.find("||").map(|i| (i, 2)))
                .chain(remaining.find('|').map(|i| {
                    // Make sure this isn't part of || (already handled)
                    if remaining.get(i + 1..i + 2) == Some("|") {
                        (usize::MAX, 1) // Skip, will be handled by ||
                    } else {
                        (i, 1)
                    }
                }))
                .chain(remaining.find(';').map(|i| (i, 1)))
                .chain(remaining.find('\n').map(|i| (i, 1)))
                .filter(|(pos, _)| *pos != usize::MAX)
                .min_by_key(|(pos, _)| *pos);

            if let Some((pos, len)) = next_split {
                let segment = &remaining[..pos];
                if !segment.trim().is_empty() {
                    commands.push(Self::extract_command_name(segment));
                }
                remaining = &remaining[pos + len..];
            } else {
                if !remaining.trim().is_empty() {
                    commands.push(Self::extract_command_name(remaining));
                }
                break;
            }
        }

        commands
    }

    fn guard_command(&self, command: &str, cwd: &Path) -> Option<String> {
        // Normalize shell line continuations before security checks so that
        // "rm \\\n-rf /" is treated as "rm -rf /" by the patterns below.
        let command = &command.replace("\\\n", " ");

        // Allowlist check: verify all commands in the pipeline are allowed
        if !self.allowed_commands.is_empty() {
            let cmd_names = Self::extract_all_commands(command);
            for name in &cmd_names {
                if !self.allowed_commands.iter().any(|a| a == name) {
                    return Some(format!(
                        "Error: Command '{}' is not in the allowed commands list. \
                         Allowed: {}",
                        name,
                        self.allowed_commands.join(", ")
                    ));
                }
            }
        }

        // Blocklist check (secondary safety layer)
        for pattern in &self.deny_patterns {
            if pattern.is_match(command) {
                return Some(format!(
                    "Error: Command blocked by security policy: {}",
                    command
                ));
            }
        }

        if self.restrict_to_workspace
            && let Some(workspace) = &self.working_dir
        {
            if !cwd.starts_with(workspace) {
                return Some(format!(
                    "Error: Working directory '{}' is outside workspace",
                    cwd.display()
                ));
            }

            // Check path-like tokens in the command for workspace escape
            if let Some(err) = Self::check_paths_in_workspace(command, workspace) {
                return Some(err);
            }
        }

        None
    }

    /// Extract absolute path tokens from a command and verify they resolve
    /// inside the workspace. Returns an error message if any path escapes.
    fn check_paths_in_workspace(command: &str, workspace: &Path) -> Option<String> {
        for token in command.split_whitespace() {
            // Strip shell quoting characters BEFORE checking for absolute path
            let cleaned = token.trim_matches(|c| c == '\'' || c == '"');
            if !cleaned.starts_with('/') {
                continue;
            }
            if cleaned.is_empty() || cleaned == "/" {
                continue;
            }
            let path = Path::new(cleaned);
            // Use canonicalize if the path exists (resolves symlinks).
            // For non-existent paths, use lexical normalization to prevent
            // symlink-based workspace escapes (canonicalize fails on non-existent
            // paths, returning the raw path which could contain `..` components).
            let resolved = path
                .canonicalize()
                .unwrap_or_else(|_| lexical_normalize(path));
            if !resolved.starts_with(workspace) {
                return Some(format!(
                    "Error: path '{}' is outside the workspace",
                    cleaned
                ));
            }
        }
        None
    }
}

/// Normalize a path lexically (without touching the filesystem).
/// Resolves `.` and `..` components so that `/workspace/../etc/passwd`
/// correctly normalizes to `/etc/passwd` rather than passing through
/// as if it starts with `/workspace`.
pub(crate) fn lexical_normalize(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                // Pop the last normal component (but never pop past root)
                if matches!(components.last(), Some(std::path::Component::Normal(_))) {
                    components.pop();
                }
            }
            std::path::Component::CurDir => {} // skip "."
            other => components.push(other),
        }
    }
    components.iter().collect()
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn description(&self) -> &'static str {
        "Execute a shell command and return its output. Use with caution."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory for the command"
                }
            },
            "required": ["command"]
        })
    }

    fn version(&self) -> ToolVersion {
        ToolVersion::new(1, 1, 0) // Version 1.1.0 - includes security improvements
    }

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<ToolResult> {
        let command = params["command"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'command' parameter"))?;

        let working_dir = params["working_dir"]
            .as_str()
            .map(PathBuf::from)
            .or_else(|| self.working_dir.clone());

        let cwd = working_dir.unwrap_or_else(|| {
            std::env::current_dir()
                .context("Failed to get current directory")
                .unwrap_or_else(|e| {
                    warn!("Failed to get current directory: {}, using '.'", e);
                    PathBuf::from(".")
                })
        });

        // Canonicalize cwd so symlinks and ".." are resolved before workspace check
        let cwd = cwd.canonicalize().unwrap_or(cwd);

        if let Some(err) = self.guard_command(command, &cwd) {
            return Ok(ToolResult::error(err));
        }

        let args = vec!["-c".to_string(), command.to_string()];
        let req = ExecRequest {
            program: "sh",
            args: &args,
            workspace: &cwd,
            level: self.sandbox_level,
            network_allowed: self.network_allowed,
            timeout: Duration::from_secs(self.timeout),
        };

        let output = match self.sandbox.execute(req).await {
            Ok(output) => output,
            Err(e) => return Ok(ToolResult::error(format!("Error executing command: {}", e))),
        };

        if output.timed_out {
            return Ok(ToolResult::error(format!(
                "Command timed out after {} seconds",
                self.timeout
            )));
        }

        let mut result = String::new();
        if !output.stdout.is_empty() {
            result.push_str(&output.stdout);
        }
        if !output.stderr.is_empty() {
            if !result.is_empty() {
                result.push_str("\n--- stderr ---\n");
            }
            result.push_str(&output.stderr);
        }
        if output.truncated {
            result.push_str("\n[output truncated]");
        }

        if output.exit_code == Some(0) {
            Ok(ToolResult::new(if result.is_empty() {
                "(no output)".to_string()
            } else {
                result
            }))
        } else {
            Ok(ToolResult::error(format!("Command failed: {}", result)))
        }
    }
}
