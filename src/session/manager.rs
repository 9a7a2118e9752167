use crate::labels::SecretDetector;
use crate::session::store::SessionStore;
use crate::utils::{atomic_write, ensure_dir, get_app_home, safe_filename};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tokio::sync::Mutex;

const MAX_CACHED_SESSIONS: usize = 64;
const MAX_SESSION_MESSAGES: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub messages: Vec<MessageData>,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "chrono::Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageData {
    pub role: String,
    pub content: String,
    pub timestamp: String,
    /// Set when the secret detector found something in `content` before
    /// it was written; `content` at that point is already the redacted
    /// form, never the raw original (§4.9).
    #[serde(default)]
    pub redacted: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Session {
    pub fn new(key: String) -> Self {
        Self {
            key,
            messages: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn add_message(&mut self, role: String, content: String, extra: HashMap<String, Value>) {
        self.add_message_with_redaction(role, content, false, extra)
    }

    pub fn add_message_with_redaction(
        &mut self,
        role: String,
        content: String,
        redacted: bool,
        extra: HashMap<String, Value>,
    ) {
        let msg = MessageData {
            role,
            content,
            timestamp: Utc::now().to_rfc3339(),
            redacted,
            extra,
        };
        self.messages.push(msg);
        self.updated_at = Utc::now();

        // Prune oldest messages
        if self.messages.len() > MAX_SESSION_MESSAGES {
            let drain_count = self.messages.len() - MAX_SESSION_MESSAGES;
            self.messages.drain(..drain_count);
        }
    }

    pub fn get_history(&self, max_messages: usize) -> Vec<HashMap<String, Value>> {
        let start = if self.messages.len() > max_messages {
            self.messages.len() - max_messages
        } else {
            0
        };

        self.messages[start..]
            .iter()
            .map(|m| {
                let mut map = HashMap::new();
                map.insert("role".to_string(), Value::String(m.role.clone()));
                map.insert("content".to_string(), Value::String(m.content.clone()));
                map
            })
            .collect()
    }

    pub fn get_full_history(&self) -> Vec<HashMap<String, Value>> {
        self.messages
            .iter()
            .map(|m| {
                let mut map = HashMap::new();
                map.insert("role".to_string(), Value::String(m.role.clone()));
                map.insert("content".to_string(), Value::String(m.content.clone()));
                map
            })
            .collect()
    }
}

pub struct SessionManager {
    sessions_dir: PathBuf,
    cache: Mutex<LruCache<String, Session>>,
    detector: SecretDetector,
}

/// Summary row for `SessionManager::list` — the metadata line plus
/// derived fields, without paying to parse every message body.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSortKey {
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Default)]
pub struct SessionListFilter {
    pub state: Option<String>,
    pub sort_by: Option<SessionSortKey>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl SessionManager {
    /// `sessions_dir` is used verbatim (created if missing) — callers
    /// resolve `config.session.dir` (or any other path) before calling in.
    pub fn new(sessions_dir: PathBuf) -> Result<Self> {
        let sessions_dir = ensure_dir(sessions_dir)?;
        Ok(Self {
            sessions_dir,
            detector: SecretDetector::new(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_CACHED_SESSIONS).expect("MAX_CACHED_SESSIONS must be > 0"),
            )),
        })
    }

    /// Convenience constructor for callers that only know the app home
    /// directory and want the default `<home>/sessions` layout.
    pub fn in_app_home() -> Result<Self> {
        Self::new(get_app_home()?.join("sessions"))
    }

    fn get_session_path(&self, key: &str) -> PathBuf {
        let safe_key = safe_filename(&key.replace(':', "_"));
        self.sessions_dir.join(format!("{}.jsonl", safe_key))
    }

    pub async fn get_or_create(&self, key: &str) -> Result<Session> {
        // Check cache with single lock scope to prevent race conditions
        let cached_session = {
            let mut cache = self.cache.lock().await;
            cache.get(key).cloned()
        };

        if let Some(session) = cached_session {
            return Ok(session);
        }

        // Try to load from disk
        let session = self.load(key)?;
        let session = session.unwrap_or_else(|| Session::new(key.to_string()));

        // Put in cache - double-check pattern to avoid duplicates
        {
            let mut cache = self.cache.lock().await;
            // Check again in case another task loaded it
            if let Some(existing) = cache.get(key) {
                return Ok(existing.clone());
            }
            cache.put(key.to_string(), session.clone());
        }

        Ok(session)
    }

    fn load(&self, key: &str) -> Result<Option<Session>> {
        let path = self.get_session_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session file: {}", path.display()))?;

        let mut messages = Vec::new();
        let mut metadata = HashMap::new();
        let mut created_at = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let data: Value =
                serde_json::from_str(line).with_context(|| "Failed to parse session JSON line")?;

            if data.get("_type") == Some(&Value::String("metadata".to_string())) {
                if let Some(meta) = data.get("metadata").and_then(|v| v.as_object()) {
                    for (k, v) in meta {
                        metadata.insert(k.clone(), v.clone());
                    }
                }
                if let Some(ts) = data.get("created_at").and_then(|v| v.as_str()) {
                    created_at = DateTime::parse_from_rfc3339(ts)
                        .ok()
                        .map(|dt| dt.with_timezone(&Utc));
                }
            } else {
                let role = data
                    .get("role")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let content = data
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let timestamp = data
                    .get("timestamp")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let redacted = data.get("redacted").and_then(|v| v.as_bool()).unwrap_or(false);

                let mut extra = HashMap::new();
                if let Some(obj) = data.as_object() {
                    for (k, v) in obj {
                        if k != "role" && k != "content" && k != "timestamp" && k != "redacted" && k != "_type" {
                            extra.insert(k.clone(), v.clone());
                        }
                    }
                }

                messages.push(MessageData {
                    role,
                    content,
                    timestamp,
                    redacted,
                    extra,
                });
            }
        }

        // Prune on load
        if messages.len() > MAX_SESSION_MESSAGES {
            let drain_count = messages.len() - MAX_SESSION_MESSAGES;
            messages.drain(..drain_count);
        }

        Ok(Some(Session {
            key: key.to_string(),
            messages,
            created_at: created_at.unwrap_or_else(Utc::now),
            updated_at: Utc::now(),
            metadata,
        }))
    }

    pub async fn save(&self, session: &Session) -> Result<()> {
        let path = self.get_session_path(&session.key);
        ensure_dir(path.parent().context("Session path has no parent")?)?;

        let mut content = String::new();

        // Write metadata line
        let metadata_line = serde_json::json!({
            "_type": "metadata",
            "created_at": session.created_at.to_rfc3339(),
            "updated_at": session.updated_at.to_rfc3339(),
            "metadata": session.metadata,
        });
        content.push_str(&serde_json::to_string(&metadata_line)?);
        content.push('\n');

        // Write messages
        for msg in &session.messages {
            let mut msg_obj = serde_json::json!({
                "role": msg.role,
                "content": msg.content,
                "timestamp": msg.timestamp,
                "redacted": msg.redacted,
            });
            for (k, v) in &msg.extra {
                msg_obj[k] = v.clone();
            }
            content.push_str(&serde_json::to_string(&msg_obj)?);
            content.push('\n');
        }

        atomic_write(&path, &content)
            .with_context(|| format!("Failed to write session file: {}", path.display()))?;

        // Update cache
        {
            let mut cache = self.cache.lock().await;
            cache.put(session.key.clone(), session.clone());
        }

        Ok(())
    }

    /// Append one message after running it through the secret detector,
    /// redacting and setting `redacted:true` when it finds anything (§4.9).
    /// This is the writer path every caller should use instead of
    /// `Session::add_message` directly, so nothing bypasses redaction on
    /// its way to disk.
    pub fn record_message(
        &self,
        session: &mut Session,
        role: impl Into<String>,
        content: impl Into<String>,
        extra: HashMap<String, Value>,
    ) {
        let content = content.into();
        let findings = self.detector.scan(&content);
        let redacted = !findings.is_empty();
        let content = if redacted { self.detector.redact(&content) } else { content };
        session.add_message_with_redaction(role.into(), content, redacted, extra);
    }

    /// List sessions by metadata alone (no message bodies parsed), with
    /// optional `state` filter (read from `metadata.state`), sort by
    /// `createdAt`/`updatedAt`, and offset/limit pagination (§4.9).
    pub fn list(&self, filter: &SessionListFilter) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.sessions_dir)
            .with_context(|| format!("Failed to read sessions dir: {}", self.sessions_dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            if let Some(session) = self.load(&key)? {
                let state = session
                    .metadata
                    .get("state")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                if let Some(wanted) = &filter.state {
                    if state.as_deref() != Some(wanted.as_str()) {
                        continue;
                    }
                }
                summaries.push(SessionSummary {
                    key: session.key,
                    created_at: session.created_at,
                    updated_at: session.updated_at,
                    message_count: session.messages.len(),
                    state,
                });
            }
        }

        match filter.sort_by {
            Some(SessionSortKey::CreatedAt) => summaries.sort_by_key(|s| s.created_at),
            Some(SessionSortKey::UpdatedAt) => summaries.sort_by_key(|s| s.updated_at),
            None => {}
        }

        let end = filter
            .limit
            .map(|l| (filter.offset + l).min(summaries.len()))
            .unwrap_or(summaries.len());
        let start = filter.offset.min(summaries.len());
        Ok(summaries[start..end].to_vec())
    }

    /// Remove a session's file and evict it from the cache.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.get_session_path(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete session file: {}", path.display()))?;
        }
        self.cache.lock().await.pop(key);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SessionManager {
    async fn get_or_create(&self, key: &str) -> Result<Session> {
        SessionManager::get_or_create(self, key).await
    }

    async fn save(&self, session: &Session) -> Result<()> {
        SessionManager::save(self, session).await
    }
}
