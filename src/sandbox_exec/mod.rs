//! Sandboxed execution facade (§4.4, C4).
//!
//! Tools that need to run an external command choose one of three
//! execution levels: `none` (no isolation, used only for tools whose
//! capability schema declares no filesystem/network risk), `process`
//! (Landlock/Seatbelt via [`crate::utils::sandbox`]), or `container`
//! (a throwaway Docker container via `bollard`, grounded on
//! `pycckuu-wintermute`'s `executor::docker::DockerExecutor`). This
//! module is the single entry point tools call through, so capability
//! enforcement and output capping happen in one place regardless of
//! which level ends up running.
//!
//! I-SB1 (fail closed): if a tool's capability requires `process` or
//! `container` isolation and that level is unavailable on this host, the
//! call fails with [`CoreError::SandboxFailure`] rather than silently
//! running unsandboxed.

use crate::config::SandboxConfig;
use crate::errors::{CoreError, CoreResult};
use crate::utils::sandbox::SandboxRules;
use crate::utils::subprocess::scrubbed_command;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_stream::StreamExt;

/// The isolation level a tool call is executed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxLevel {
    None,
    Process,
    Container,
}

/// A request to execute one command under sandboxing.
pub struct ExecRequest<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub workspace: &'a Path,
    pub level: SandboxLevel,
    pub network_allowed: bool,
    pub timeout: Duration,
}

/// The outcome of a sandboxed execution. Output is already capped to
/// `config.outputCapBytes` — callers do not need to re-truncate.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub truncated: bool,
    pub timed_out: bool,
}

/// Dispatches tool-invoked command execution to the process or container
/// sandbox, enforcing fail-closed behaviour when the requested level is
/// unavailable.
pub struct SandboxExecutor {
    config: SandboxConfig,
    docker: Option<Docker>,
}

impl SandboxExecutor {
    /// Build an executor. Docker connectivity is probed lazily (on first
    /// container-level request) rather than here, so constructing an
    /// executor never fails just because Docker isn't running.
    pub fn new(config: SandboxConfig) -> Self {
        let docker = if config.container_enabled {
            Docker::connect_with_local_defaults().ok()
        } else {
            None
        };
        Self { config, docker }
    }

    /// Whether `level` can actually be satisfied on this host right now.
    pub async fn level_available(&self, level: SandboxLevel) -> bool {
        match level {
            SandboxLevel::None => true,
            SandboxLevel::Process => crate::utils::sandbox::is_available(),
            SandboxLevel::Container => match &self.docker {
                Some(docker) => docker.ping().await.is_ok(),
                None => false,
            },
        }
    }

    pub async fn execute(&self, req: ExecRequest<'_>) -> CoreResult<ExecOutput> {
        if !self.level_available(req.level).await {
            return Err(CoreError::SandboxFailure(format!(
                "{:?} sandbox level is not available on this host",
                req.level
            )));
        }
        match req.level {
            SandboxLevel::None => self.execute_unsandboxed(req).await,
            SandboxLevel::Process => self.execute_process(req).await,
            SandboxLevel::Container => self.execute_container(req).await,
        }
    }

    async fn execute_unsandboxed(&self, req: ExecRequest<'_>) -> CoreResult<ExecOutput> {
        let mut cmd = scrubbed_command(req.program);
        cmd.args(req.args).current_dir(req.workspace);
        self.run_command(cmd, req.timeout).await
    }

    async fn execute_process(&self, req: ExecRequest<'_>) -> CoreResult<ExecOutput> {
        let rules = SandboxRules::for_shell(req.workspace, &self.config);
        let mut rules = rules;
        rules.block_network = rules.block_network || !req.network_allowed;

        let mut cmd = scrubbed_command(req.program);
        cmd.args(req.args).current_dir(req.workspace);
        crate::utils::sandbox::apply_to_command(&mut cmd, &rules)
            .map_err(|e| CoreError::SandboxFailure(e.to_string()))?;
        self.run_command(cmd, req.timeout).await
    }

    async fn run_command(
        &self,
        mut cmd: tokio::process::Command,
        timeout: Duration,
    ) -> CoreResult<ExecOutput> {
        use std::process::Stdio;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| CoreError::SandboxFailure(format!("failed to spawn process: {e}")))?;

        let cap = self.config.output_cap_bytes;
        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");

        async fn read_capped(
            mut stdout_pipe: impl AsyncReadExt + Unpin,
            mut stderr_pipe: impl AsyncReadExt + Unpin,
            cap: usize,
        ) -> (String, String, bool) {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let _ = tokio::join!(
                (&mut stdout_pipe).take(cap as u64).read_to_end(&mut stdout_buf),
                (&mut stderr_pipe).take(cap as u64).read_to_end(&mut stderr_buf),
            );
            let truncated = stdout_buf.len() >= cap || stderr_buf.len() >= cap;
            (
                String::from_utf8_lossy(&stdout_buf).into_owned(),
                String::from_utf8_lossy(&stderr_buf).into_owned(),
                truncated,
            )
        }

        match tokio::time::timeout(timeout, read_capped(stdout_pipe, stderr_pipe, cap)).await {
            Ok((stdout, stderr, truncated)) => {
                let status = child.wait().await.ok();
                Ok(ExecOutput {
                    stdout,
                    stderr,
                    exit_code: status.and_then(|s| s.code()),
                    truncated,
                    timed_out: false,
                })
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    truncated: false,
                    timed_out: true,
                })
            }
        }
    }

    async fn execute_container(&self, req: ExecRequest<'_>) -> CoreResult<ExecOutput> {
        let docker = self
            .docker
            .as_ref()
            .ok_or_else(|| CoreError::SandboxFailure("docker is not configured".into()))?;

        let container_name = format!("coreward-sandbox-{}", uuid::Uuid::new_v4());
        let container_config = build_container_config(
            &self.config,
            req.workspace,
            req.program,
            req.args,
            req.network_allowed,
        )?;

        docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(|e| CoreError::SandboxFailure(format!("container create failed: {e}")))?;

        let result = self.run_container(docker, &container_name, req.timeout).await;

        let _ = docker
            .remove_container(
                &container_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        result
    }

    async fn run_container(
        &self,
        docker: &Docker,
        container_name: &str,
        timeout: Duration,
    ) -> CoreResult<ExecOutput> {
        docker
            .start_container(container_name, None::<bollard::container::StartContainerOptions<String>>)
            .await
            .map_err(|e| CoreError::SandboxFailure(format!("container start failed: {e}")))?;

        let wait = async {
            let mut stream = docker.wait_container(container_name, None::<WaitContainerOptions<String>>);
            stream.next().await
        };

        let wait_result = tokio::time::timeout(timeout, wait).await;
        let timed_out = wait_result.is_err();
        let exit_code = match wait_result {
            Ok(Some(Ok(response))) => Some(response.status_code as i32),
            _ => None,
        };

        let cap = self.config.output_cap_bytes;
        let (stdout, stderr, truncated) = self.collect_logs(docker, container_name, cap).await;

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
            truncated,
            timed_out,
        })
    }

    async fn collect_logs(
        &self,
        docker: &Docker,
        container_name: &str,
        cap: usize,
    ) -> (String, String, bool) {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = docker.logs(container_name, Some(options));
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(Ok(chunk)) = stream.next().await {
            match chunk {
                LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                LogOutput::Console { message } => stdout.extend_from_slice(&message),
                _ => {}
            }
            if stdout.len() >= cap || stderr.len() >= cap {
                break;
            }
        }
        let truncated = stdout.len() > cap || stderr.len() > cap;
        stdout.truncate(cap);
        stderr.truncate(cap);
        (
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
            truncated,
        )
    }
}

fn build_container_config(
    config: &SandboxConfig,
    workspace: &Path,
    program: &str,
    args: &[String],
    network_allowed: bool,
) -> CoreResult<ContainerConfig<String>> {
    let memory_limit = (config.container_memory_limit_mb as i64)
        .saturating_mul(1024)
        .saturating_mul(1024);
    let nano_cpus = (config.container_cpu_limit * 1_000_000_000.0) as i64;

    let workspace: PathBuf = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf());

    let mut tmpfs: HashMap<String, String> = HashMap::new();
    tmpfs.insert("/tmp".to_string(), "rw,size=64m".to_string());

    let host_config = HostConfig {
        network_mode: Some(if network_allowed { "bridge" } else { "none" }.to_string()),
        readonly_rootfs: Some(true),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        pids_limit: Some(config.container_pids_limit),
        memory: Some(memory_limit),
        nano_cpus: Some(nano_cpus),
        binds: Some(vec![format!("{}:/workspace", workspace.display())]),
        tmpfs: Some(tmpfs),
        ..Default::default()
    };

    let mut cmd = vec![program.to_string()];
    cmd.extend(args.iter().cloned());

    Ok(ContainerConfig {
        image: Some(config.container_image.clone()),
        cmd: Some(cmd),
        working_dir: Some("/workspace".to_string()),
        host_config: Some(host_config),
        ..Default::default()
    })
}
