use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    #[serde(rename = "maxTokens")]
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(rename = "maxToolIterations")]
    pub max_tool_iterations: u32,
    #[serde(rename = "maxTurns")]
    pub max_turns: u32,
    pub workspace: String,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            max_tool_iterations: 25,
            max_turns: 200,
            workspace: "~/.coreward/workspace".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            defaults: AgentDefaults::default(),
        }
    }
}

/// One configured LLM provider backend. Generic rather than one struct per
/// vendor, since the core is provider-agnostic (see `providers::base`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    pub model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "anthropic".to_string(),
            api_key: String::new(),
            base_url: String::new(),
            model: "claude-sonnet-4-5".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub primary: ProviderConfig,
    pub fallbacks: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    #[serde(rename = "failureThreshold")]
    pub failure_threshold: u32,
    #[serde(rename = "resetTimeoutMs")]
    pub reset_timeout_ms: u64,
    #[serde(rename = "halfOpenProbes")]
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_probes: 1,
        }
    }
}

/// One `{host, methods}` allowlist entry for the network guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAllowEntry {
    pub host: String,
    #[serde(default)]
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkGuardConfig {
    pub allowlist: Vec<NetworkAllowEntry>,
    #[serde(rename = "blockPrivateIps")]
    pub block_private_ips: bool,
    #[serde(rename = "blockMetadataEndpoints")]
    pub block_metadata_endpoints: bool,
    #[serde(rename = "blockedPorts")]
    pub blocked_ports: Vec<u16>,
    #[serde(rename = "dnsCacheTtlMs")]
    pub dns_cache_ttl_ms: u64,
}

impl Default for NetworkGuardConfig {
    fn default() -> Self {
        Self {
            allowlist: Vec::new(),
            block_private_ips: true,
            block_metadata_endpoints: true,
            blocked_ports: vec![22, 23, 25, 3389],
            dns_cache_ttl_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Whether the `container` execution level is permitted at all; when
    /// `false`, tools requiring it fail with `sandbox_failure`.
    #[serde(rename = "containerEnabled")]
    pub container_enabled: bool,
    #[serde(rename = "containerImage")]
    pub container_image: String,
    #[serde(rename = "containerMemoryLimitMb")]
    pub container_memory_limit_mb: u64,
    #[serde(rename = "containerCpuLimit")]
    pub container_cpu_limit: f64,
    #[serde(rename = "containerPidsLimit")]
    pub container_pids_limit: i64,
    #[serde(rename = "processTimeoutMs")]
    pub process_timeout_ms: u64,
    /// Byte cap applied to combined stdout+stderr of a sandboxed process
    /// before the executor truncates it (I-SB2).
    #[serde(rename = "outputCapBytes")]
    pub output_cap_bytes: usize,
    /// Extra read-only paths granted to the process sandbox beyond the
    /// baseline system directories, e.g. a project's vendored toolchain.
    #[serde(rename = "additionalReadPaths")]
    pub additional_read_paths: Vec<String>,
    /// Extra read-write paths granted beyond the workspace and temp dirs.
    #[serde(rename = "additionalWritePaths")]
    pub additional_write_paths: Vec<String>,
    /// Deny all network access from sandboxed processes, overriding
    /// whatever a tool's capability declares as its network default.
    #[serde(rename = "blockNetwork")]
    pub block_network: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            container_enabled: false,
            container_image: "coreward/sandbox:latest".to_string(),
            container_memory_limit_mb: 256,
            container_cpu_limit: 1.0,
            container_pids_limit: 64,
            process_timeout_ms: 30_000,
            output_cap_bytes: 1_000_000,
            additional_read_paths: Vec::new(),
            additional_write_paths: Vec::new(),
            block_network: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub dir: String,
    #[serde(rename = "integrityMode")]
    pub integrity_mode: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: "~/.coreward/audit".to_string(),
            integrity_mode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: u64,
    #[serde(rename = "codeTtlSecs")]
    pub code_ttl_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            code_ttl_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub dir: String,
    #[serde(rename = "workingCapacity")]
    pub working_capacity: usize,
    #[serde(rename = "episodicMaxResults")]
    pub episodic_max_results: usize,
    /// Floor below which an episodic search hit is dropped, however it ranks.
    #[serde(rename = "minSimilarity")]
    pub min_similarity: f32,
    /// Retention cap: oldest episodic entries beyond this count (per user)
    /// are evicted on write.
    #[serde(rename = "maxEntriesPerUser")]
    pub max_entries_per_user: usize,
    /// Approximate token budget for working memory before oldest
    /// non-system entries are evicted.
    #[serde(rename = "workingTokenCap")]
    pub working_token_cap: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: "~/.coreward/memory".to_string(),
            working_capacity: 50,
            episodic_max_results: 20,
            min_similarity: 0.75,
            max_entries_per_user: 5000,
            working_token_cap: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub dir: String,
    #[serde(rename = "cacheCapacity")]
    pub cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dir: "~/.coreward/sessions".to_string(),
            cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialHelperConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub format: String,
}

impl Default for CredentialHelperConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            format: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    #[serde(rename = "circuitBreaker")]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(rename = "networkGuard")]
    pub network_guard: NetworkGuardConfig,
    pub sandbox: SandboxConfig,
    pub audit: AuditConfig,
    pub approval: ApprovalConfig,
    pub memory: MemoryConfig,
    pub session: SessionConfig,
    #[serde(rename = "credentialHelper")]
    pub credential_helper: CredentialHelperConfig,
}

impl Config {
    pub fn workspace_path(&self) -> PathBuf {
        crate::utils::get_workspace_path(&self.agents.defaults.workspace)
    }

    /// Validate configuration values. Called after every load (file +
    /// env-var + credential-helper overrides applied) and before the
    /// config is handed to any component.
    pub fn validate(&self) -> Result<(), crate::errors::CoreError> {
        self.validate_agent_defaults()?;
        self.validate_circuit_breaker()?;
        self.validate_network_guard()?;
        self.validate_sandbox()?;
        Ok(())
    }

    fn validate_agent_defaults(&self) -> Result<(), crate::errors::CoreError> {
        use crate::errors::CoreError;
        let d = &self.agents.defaults;

        if d.max_tokens == 0 {
            return Err(CoreError::Config(
                "agents.defaults.maxTokens must be > 0".into(),
            ));
        }
        if d.max_tokens > 1_000_000 {
            return Err(CoreError::Config(
                "agents.defaults.maxTokens is unreasonably large (> 1,000,000)".into(),
            ));
        }
        if !(0.0..=2.0).contains(&d.temperature) {
            return Err(CoreError::Config(
                "agents.defaults.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if d.max_tool_iterations == 0 {
            return Err(CoreError::Config(
                "agents.defaults.maxToolIterations must be > 0".into(),
            ));
        }
        if d.max_turns == 0 {
            return Err(CoreError::Config(
                "agents.defaults.maxTurns must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_circuit_breaker(&self) -> Result<(), crate::errors::CoreError> {
        use crate::errors::CoreError;
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(CoreError::Config(
                "circuitBreaker.failureThreshold must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_network_guard(&self) -> Result<(), crate::errors::CoreError> {
        use crate::errors::CoreError;
        for entry in &self.network_guard.allowlist {
            if entry.host.is_empty() {
                return Err(CoreError::Config(
                    "networkGuard.allowlist entries must have a non-empty host".into(),
                ));
            }
        }
        Ok(())
    }

    fn validate_sandbox(&self) -> Result<(), crate::errors::CoreError> {
        use crate::errors::CoreError;
        if self.sandbox.process_timeout_ms == 0 {
            return Err(CoreError::Config(
                "sandbox.processTimeoutMs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
