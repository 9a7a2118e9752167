//! Local administrative shell (C15): `clap`-derived subcommands for
//! inspecting and managing sessions, the audit log, and semantic memory,
//! plus a `doctor` probe over sandbox/container availability and config
//! validity. Every subcommand is a thin wrapper over an already-built
//! component API. Not a channel transport, and it does not run the
//! orchestrator.

use crate::audit::{AuditLogger, QueryFilter, Severity};
use crate::config::{self, Config};
use crate::memory::SemanticStore;
use crate::resilience::BreakerConfig;
use crate::sandbox_exec::{SandboxExecutor, SandboxLevel};
use crate::session::{SessionListFilter, SessionManager, SessionSortKey};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "coreward")]
#[command(about = "Inspect and administer a coreward installation")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config.json/config.toml (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage stored conversation sessions
    Sessions {
        #[command(subcommand)]
        cmd: SessionsCommands,
    },
    /// Query and verify the append-only audit log
    Audit {
        #[command(subcommand)]
        cmd: AuditCommands,
    },
    /// Query durable semantic facts
    Memory {
        #[command(subcommand)]
        cmd: MemoryCommands,
    },
    /// Probe sandbox/container availability and validate configuration
    Doctor,
}

#[derive(Subcommand)]
enum SessionsCommands {
    /// List sessions, most recently updated metadata only
    List {
        /// Only sessions whose metadata.state equals this value
        #[arg(long)]
        state: Option<String>,
        /// Sort by `created-at` or `updated-at`
        #[arg(long)]
        sort: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the full message history for one session
    Show {
        key: String,
        /// Number of most recent messages to print (default: all)
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Delete a session's file and evict it from cache
    Rm { key: String },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Query logged entries (NEVER-LOG fields are never persisted, so
    /// there is nothing more to redact here)
    Query {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        action: Option<String>,
        /// `info`, `warning`, or `critical`
        #[arg(long)]
        severity: Option<String>,
        /// RFC3339 timestamp, inclusive lower bound
        #[arg(long)]
        since: Option<String>,
        /// RFC3339 timestamp, inclusive upper bound
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Recompute and check one day's hash chain (integrity mode only)
    Verify {
        /// YYYY-MM-DD, defaults to today (UTC)
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Query durable semantic facts for a user
    Query {
        #[arg(long = "user")]
        user_id: String,
        /// Identity the visibility check is evaluated against; defaults
        /// to `user` (a self-query)
        #[arg(long = "requester")]
        requester_id: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;
    config
        .validate()
        .context("loaded configuration failed validation")?;

    match cli.command {
        Commands::Sessions { cmd } => sessions_command(&config, cmd).await?,
        Commands::Audit { cmd } => audit_command(&config, cmd)?,
        Commands::Memory { cmd } => memory_command(&config, cmd)?,
        Commands::Doctor => doctor_command(&config).await?,
    }

    Ok(())
}

fn sessions_dir(config: &Config) -> std::path::PathBuf {
    crate::utils::get_workspace_path(&config.session.dir)
}

async fn sessions_command(config: &Config, cmd: SessionsCommands) -> Result<()> {
    let manager = SessionManager::new(sessions_dir(config))?;

    match cmd {
        SessionsCommands::List { state, sort, offset, limit } => {
            let sort_by = match sort.as_deref() {
                Some("created-at") => Some(SessionSortKey::CreatedAt),
                Some("updated-at") => Some(SessionSortKey::UpdatedAt),
                Some(other) => anyhow::bail!("unknown --sort value '{other}' (expected created-at or updated-at)"),
                None => None,
            };
            let filter = SessionListFilter { state, sort_by, offset, limit };
            let summaries = manager.list(&filter)?;
            if summaries.is_empty() {
                println!("No sessions found.");
                return Ok(());
            }
            for s in summaries {
                println!(
                    "{:<32} messages={:<5} state={:<10} created={} updated={}",
                    s.key,
                    s.message_count,
                    s.state.as_deref().unwrap_or("-"),
                    s.created_at.to_rfc3339(),
                    s.updated_at.to_rfc3339(),
                );
            }
        }
        SessionsCommands::Show { key, tail } => {
            let session = manager.get_or_create(&key).await?;
            let history = match tail {
                Some(n) => session.get_history(n),
                None => session.get_full_history(),
            };
            if history.is_empty() {
                println!("Session '{key}' has no messages.");
                return Ok(());
            }
            for msg in history {
                let role = msg.get("role").and_then(|v| v.as_str()).unwrap_or("?");
                let content = msg.get("content").and_then(|v| v.as_str()).unwrap_or("");
                println!("[{role}] {content}");
            }
        }
        SessionsCommands::Rm { key } => {
            manager.delete(&key).await?;
            println!("Deleted session '{key}'.");
        }
    }
    Ok(())
}

fn parse_severity(s: &str) -> Result<Severity> {
    match s.to_ascii_lowercase().as_str() {
        "info" => Ok(Severity::Info),
        "warning" => Ok(Severity::Warning),
        "critical" => Ok(Severity::Critical),
        other => anyhow::bail!("unknown --severity value '{other}' (expected info, warning, or critical)"),
    }
}

fn audit_command(config: &Config, cmd: AuditCommands) -> Result<()> {
    let audit_dir = crate::utils::get_workspace_path(&config.audit.dir);
    let logger = AuditLogger::new(audit_dir, config.audit.integrity_mode)?;

    match cmd {
        AuditCommands::Query { category, action, severity, since, until, limit } => {
            let severity = severity.as_deref().map(parse_severity).transpose()?;
            let since = since
                .as_deref()
                .map(|s| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)))
                .transpose()
                .context("invalid --since timestamp (expected RFC3339)")?;
            let until = until
                .as_deref()
                .map(|s| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)))
                .transpose()
                .context("invalid --until timestamp (expected RFC3339)")?;
            let filter = QueryFilter { category, action, severity, since, until, limit };
            let entries = logger.query(&filter)?;
            if entries.is_empty() {
                println!("No matching audit entries.");
                return Ok(());
            }
            for e in entries {
                println!(
                    "{} [{:?}] {}/{} {}",
                    e.timestamp.to_rfc3339(),
                    e.severity,
                    e.category,
                    e.action,
                    e.metadata,
                );
            }
        }
        AuditCommands::Verify { date } => {
            let date = match date {
                Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d").context("invalid --date (expected YYYY-MM-DD)")?,
                None => Utc::now().date_naive(),
            };
            let result = logger.verify_chain(date)?;
            if result.valid {
                println!("Chain for {date} is valid.");
            } else {
                println!(
                    "Chain for {date} is BROKEN at entry {}.",
                    result.broken_at.as_deref().unwrap_or("<unknown>")
                );
                anyhow::bail!("audit chain verification failed");
            }
        }
    }
    Ok(())
}

fn memory_command(config: &Config, cmd: MemoryCommands) -> Result<()> {
    match cmd {
        MemoryCommands::Query { user_id, requester_id, subject, category } => {
            let memory_dir = crate::utils::get_workspace_path(&config.memory.dir);
            crate::utils::ensure_dir(&memory_dir)?;
            let store = SemanticStore::open(memory_dir.join("semantic.sqlite3"))?;
            let requester_id = requester_id.as_deref().unwrap_or(&user_id);
            let facts = store.query(requester_id, &user_id, subject.as_deref(), category.as_deref())?;
            if facts.is_empty() {
                println!("No semantic facts found for user '{user_id}'.");
                return Ok(());
            }
            for f in facts {
                println!(
                    "{} | {} {} {} (confidence={:.2}, visibility={:?}, category={})",
                    f.id, f.subject, f.predicate, f.object, f.confidence, f.visibility, f.category
                );
            }
        }
    }
    Ok(())
}

async fn doctor_command(config: &Config) -> Result<()> {
    println!("config: OK (validated)");
    println!("workspace: {}", config.workspace_path().display());

    let executor = SandboxExecutor::new(config.sandbox.clone());
    for level in [SandboxLevel::None, SandboxLevel::Process, SandboxLevel::Container] {
        let available = executor.level_available(level).await;
        println!("sandbox[{level:?}]: {}", if available { "available" } else { "unavailable" });
    }

    println!(
        "network guard: block_private_ips={} block_metadata_endpoints={} allowlist_entries={} blocked_ports={:?}",
        config.network_guard.block_private_ips,
        config.network_guard.block_metadata_endpoints,
        config.network_guard.allowlist.len(),
        config.network_guard.blocked_ports,
    );

    let breaker: BreakerConfig = (&config.circuit_breaker).into();
    println!(
        "circuit breaker: enabled={} failure_threshold={} reset_timeout={:?} half_open_probes={}",
        breaker.enabled, breaker.failure_threshold, breaker.reset_timeout, breaker.half_open_probes,
    );
    println!("(breaker state itself is per-process and not persisted; this is the configured policy only)");

    println!("audit: dir={} integrity_mode={}", config.audit.dir, config.audit.integrity_mode);
    println!("memory: dir={} max_entries_per_user={}", config.memory.dir, config.memory.max_entries_per_user);
    println!("sessions: dir={}", config.session.dir);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_severity_accepts_known_values_case_insensitively() {
        assert_eq!(parse_severity("info").unwrap(), Severity::Info);
        assert_eq!(parse_severity("WARNING").unwrap(), Severity::Warning);
        assert_eq!(parse_severity("Critical").unwrap(), Severity::Critical);
    }

    #[test]
    fn parse_severity_rejects_unknown_values() {
        assert!(parse_severity("urgent").is_err());
    }

    #[test]
    fn sessions_list_parses_filters_and_pagination() {
        let cli = Cli::try_parse_from([
            "coreward", "sessions", "list", "--state", "active", "--sort", "updated-at", "--offset", "5",
            "--limit", "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Sessions {
                cmd: SessionsCommands::List { state, sort, offset, limit },
            } => {
                assert_eq!(state.as_deref(), Some("active"));
                assert_eq!(sort.as_deref(), Some("updated-at"));
                assert_eq!(offset, 5);
                assert_eq!(limit, Some(10));
            }
            _ => panic!("expected Sessions(List)"),
        }
    }

    #[test]
    fn sessions_rm_requires_a_key() {
        assert!(Cli::try_parse_from(["coreward", "sessions", "rm"]).is_err());
        let cli = Cli::try_parse_from(["coreward", "sessions", "rm", "cli:default"]).unwrap();
        match cli.command {
            Commands::Sessions { cmd: SessionsCommands::Rm { key } } => assert_eq!(key, "cli:default"),
            _ => panic!("expected Sessions(Rm)"),
        }
    }

    #[test]
    fn audit_verify_parses_an_optional_date() {
        let cli = Cli::try_parse_from(["coreward", "audit", "verify", "--date", "2026-01-15"]).unwrap();
        match cli.command {
            Commands::Audit { cmd: AuditCommands::Verify { date } } => assert_eq!(date.as_deref(), Some("2026-01-15")),
            _ => panic!("expected Audit(Verify)"),
        }
    }

    #[test]
    fn memory_query_defaults_requester_to_none_for_self_query() {
        let cli = Cli::try_parse_from(["coreward", "memory", "query", "--user", "alice"]).unwrap();
        match cli.command {
            Commands::Memory { cmd: MemoryCommands::Query { user_id, requester_id, .. } } => {
                assert_eq!(user_id, "alice");
                assert!(requester_id.is_none());
            }
            _ => panic!("expected Memory(Query)"),
        }
    }

    #[test]
    fn doctor_takes_no_arguments() {
        assert!(Cli::try_parse_from(["coreward", "doctor"]).is_ok());
        assert!(Cli::try_parse_from(["coreward", "doctor", "--bogus"]).is_err());
    }
}
