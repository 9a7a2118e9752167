//! Append-only audit logger (§4.5, C5).
//!
//! Writer pipeline: `sanitize -> (optional) chain -> append`, one JSONL
//! file per UTC day (`audit-YYYY-MM-DD.jsonl`). Sanitisation enforces the
//! NEVER-LOG contract unconditionally — no caller, however well-meaning,
//! can persist raw message/tool/file/memory content through this logger.

pub mod alert;
pub mod chain;

use crate::labels::secret_detector::SecretDetector;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub use alert::{AlertAction, AlertEngine, AlertRule};
pub use chain::ChainVerification;

/// Field paths stripped from `metadata` unconditionally, regardless of
/// what a caller tries to put there. Each pair is `(top-level key,
/// nested field name)`; e.g. `("message", "content")` strips
/// `metadata.message.content`.
const NEVER_LOG_PATHS: &[(&str, &str)] = &[
    ("message", "content"),
    ("tool", "output"),
    ("file", "content"),
    ("memory", "content"),
    ("response", "text"),
];

const ERROR_MESSAGE_MAX_LEN: usize = 500;

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut capped: String = s.chars().take(max).collect();
    capped.push_str("...[truncated]");
    capped
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One audit log entry, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub action: String,
    pub severity: Severity,
    pub metadata: serde_json::Value,
    /// Present only when integrity mode is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_hash: Option<String>,
}

impl AuditEntry {
    /// Canonical JSON used for hashing: same shape as the stored entry but
    /// with `entry_hash` forced to `None`, so the hash commits to
    /// everything else without being self-referential. `serde_json`'s
    /// default `Value::Object` is backed by a `BTreeMap`, so key order
    /// (including inside `metadata`) is deterministic.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut unhashed = self.clone();
        unhashed.entry_hash = None;
        serde_json::to_vec(&unhashed).expect("AuditEntry always serializes")
    }
}

/// Strip NEVER-LOG paths from `metadata` unconditionally (I-AU1), and run
/// `metadata.errorMessage` (if present) through the secret detector plus a
/// truncation cap.
fn sanitize_metadata(mut metadata: serde_json::Value, detector: &SecretDetector) -> serde_json::Value {
    if let Some(obj) = metadata.as_object_mut() {
        for (top, field) in NEVER_LOG_PATHS {
            if let Some(serde_json::Value::Object(inner)) = obj.get_mut(*top) {
                inner.remove(*field);
            }
        }
        if let Some(serde_json::Value::String(msg)) = obj.get("errorMessage") {
            let redacted = detector.redact(msg);
            let capped = truncate_chars(&redacted, ERROR_MESSAGE_MAX_LEN);
            obj.insert("errorMessage".to_string(), serde_json::Value::String(capped));
        }
    }
    metadata
}

struct OpenDay {
    date: NaiveDate,
    file: File,
    prev_hash: Option<String>,
}

/// Append-only audit log with optional tamper-evident hash chaining.
pub struct AuditLogger {
    dir: PathBuf,
    integrity_mode: bool,
    detector: SecretDetector,
    current: Mutex<Option<OpenDay>>,
}

impl AuditLogger {
    pub fn new(dir: impl Into<PathBuf>, integrity_mode: bool) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create audit dir: {}", dir.display()))?;
        Ok(Self {
            dir,
            integrity_mode,
            detector: SecretDetector::new(),
            current: Mutex::new(None),
        })
    }

    fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit-{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Last `entry_hash` written in `path`, by scanning its final line.
    /// Used to resume a chain after restart.
    fn last_hash_in(path: &Path) -> Option<String> {
        let file = File::open(path).ok()?;
        let reader = BufReader::new(file);
        let mut last = None;
        for line in reader.lines().map_while(std::result::Result::ok) {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<AuditEntry>(&line) {
                last = entry.entry_hash;
            }
        }
        last
    }

    fn ensure_open(&self, guard: &mut Option<OpenDay>, today: NaiveDate) -> Result<()> {
        let needs_rotate = match guard.as_ref() {
            Some(open) => open.date != today,
            None => true,
        };
        if !needs_rotate {
            return Ok(());
        }
        let path = self.day_path(today);
        let prev_hash = if self.integrity_mode {
            Self::last_hash_in(&path)
        } else {
            None
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open audit log: {}", path.display()))?;
        *guard = Some(OpenDay { date: today, file, prev_hash });
        Ok(())
    }

    /// Append one entry. Never panics; a write failure is surfaced to the
    /// caller, who (per §7 failure semantics) must not drop it silently.
    pub fn log(
        &self,
        category: impl Into<String>,
        action: impl Into<String>,
        severity: Severity,
        metadata: serde_json::Value,
    ) -> Result<AuditEntry> {
        let metadata = sanitize_metadata(metadata, &self.detector);
        let now = Utc::now();

        let mut guard = self.current.lock().map_err(|_| anyhow::anyhow!("audit log lock poisoned"))?;
        self.ensure_open(&mut guard, now.date_naive())?;
        let open = guard.as_mut().expect("ensure_open always populates");

        let mut entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            category: category.into(),
            action: action.into(),
            severity,
            metadata,
            prev_hash: None,
            entry_hash: None,
        };

        if self.integrity_mode {
            entry.prev_hash = open.prev_hash.clone();
            let mut hasher = Sha256::new();
            hasher.update(entry.canonical_bytes());
            hasher.update(entry.prev_hash.as_deref().unwrap_or("").as_bytes());
            let hash = hex::encode(hasher.finalize());
            entry.entry_hash = Some(hash.clone());
            open.prev_hash = Some(hash);
        }

        let line = serde_json::to_string(&entry)?;
        writeln!(open.file, "{line}")?;
        open.file.flush()?;

        Ok(entry)
    }

    /// Verify the hash chain for `date`. No-op success if integrity mode
    /// was never on for that day (nothing to verify).
    pub fn verify_chain(&self, date: NaiveDate) -> Result<ChainVerification> {
        chain::verify_chain(&self.day_path(date))
    }

    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<AuditEntry>> {
        let mut results = Vec::new();
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read audit dir: {}", self.dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("audit-") && n.ends_with(".jsonl"))
            })
            .collect();
        files.sort();

        for path in files {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    warn!(path = %path.display(), "failed to open audit file for query: {e}");
                    continue;
                }
            };
            for line in BufReader::new(file).lines().map_while(std::result::Result::ok) {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditEntry>(&line) {
                    Ok(entry) => {
                        if filter.matches(&entry) {
                            results.push(entry);
                        }
                    }
                    Err(e) => warn!("skipping malformed audit line: {e}"),
                }
            }
        }

        results.sort_by_key(|e| e.timestamp);
        if let Some(limit) = filter.limit {
            if results.len() > limit {
                let start = results.len() - limit;
                results = results.split_off(start);
            }
        }
        Ok(results)
    }
}

/// Filters for [`AuditLogger::query`]. All fields are conjunctive; `None`
/// means "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub category: Option<String>,
    pub action: Option<String>,
    pub severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl QueryFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(category) = &self.category {
            if &entry.category != category {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if entry.severity != severity {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        true
    }
}
