//! Episodic memory: durable, per-user, vector-searchable entries (§4.8, C8).
//!
//! Grounded on `agent::memory::memory_db::MemoryDB`'s `SQLite`-over-a-
//! `Mutex<Connection>` shape and its embedding-as-a-column convention, but
//! the spec calls for a plain `embedding` JSON column rather than a BLOB,
//! so similarity search here deserializes JSON per row instead of
//! maintaining an in-memory embedding cache.

use super::Visibility;
use crate::memory::embedding::cosine_similarity;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct EpisodicEntry {
    pub id: String,
    pub namespace: String,
    pub user_id: String,
    pub category: String,
    pub content: String,
    /// I-E1: set when the stored `content` is a redacted form of what was
    /// submitted, because the secret detector found something.
    pub redacted: bool,
    pub visibility: Visibility,
    pub created_by: String,
    pub session_id: String,
    pub turn_number: i64,
    pub participants: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// A search hit: the entry plus the cosine similarity it matched at.
#[derive(Debug, Clone)]
pub struct EpisodicHit {
    pub entry: EpisodicEntry,
    pub similarity: f32,
}

/// Request to store one episodic entry. `content` is passed through the
/// secret detector by [`EpisodicStore::add`] before it is persisted;
/// callers should pass the raw text, not a pre-redacted version.
pub struct AddEpisodicEntry {
    pub namespace: String,
    pub user_id: String,
    pub category: String,
    pub content: String,
    pub visibility: Option<Visibility>,
    pub created_by: String,
    pub session_id: String,
    pub turn_number: i64,
    pub participants: Vec<String>,
}

struct RawRow {
    id: String,
    namespace: String,
    user_id: String,
    category: String,
    content: String,
    redacted: i64,
    visibility: String,
    created_by: String,
    session_id: String,
    turn_number: i64,
    participants: String,
    embedding: String,
    created_at: String,
    last_accessed_at: String,
}

fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        namespace: row.get(1)?,
        user_id: row.get(2)?,
        category: row.get(3)?,
        content: row.get(4)?,
        redacted: row.get(5)?,
        visibility: row.get(6)?,
        created_by: row.get(7)?,
        session_id: row.get(8)?,
        turn_number: row.get(9)?,
        participants: row.get(10)?,
        embedding: row.get(11)?,
        created_at: row.get(12)?,
        last_accessed_at: row.get(13)?,
    })
}

impl RawRow {
    fn into_entry_and_embedding(self) -> Result<(EpisodicEntry, Vec<f32>)> {
        let entry = EpisodicEntry {
            id: self.id,
            namespace: self.namespace,
            user_id: self.user_id,
            category: self.category,
            content: self.content,
            redacted: self.redacted != 0,
            visibility: Visibility::parse(&self.visibility),
            created_by: self.created_by,
            session_id: self.session_id,
            turn_number: self.turn_number,
            participants: serde_json::from_str(&self.participants).context("corrupt participants column")?,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .context("corrupt created_at column")?
                .with_timezone(&Utc),
            last_accessed_at: DateTime::parse_from_rfc3339(&self.last_accessed_at)
                .context("corrupt last_accessed_at column")?
                .with_timezone(&Utc),
        };
        let embedding: Vec<f32> = serde_json::from_str(&self.embedding).context("corrupt embedding column")?;
        Ok((entry, embedding))
    }
}

const SELECT_COLUMNS: &str = "id, namespace, user_id, category, content, redacted, visibility, \
     created_by, session_id, turn_number, participants, embedding, created_at, last_accessed_at";

pub struct EpisodicStore {
    conn: Mutex<Connection>,
    max_entries_per_user: usize,
    detector: crate::labels::secret_detector::SecretDetector,
}

impl EpisodicStore {
    pub fn open(path: impl AsRef<Path>, max_entries_per_user: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create episodic memory dir: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open episodic memory db: {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=3000;",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS episodic_entries (
                id TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                user_id TEXT NOT NULL,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                redacted INTEGER NOT NULL,
                visibility TEXT NOT NULL,
                created_by TEXT NOT NULL,
                session_id TEXT NOT NULL,
                turn_number INTEGER NOT NULL,
                participants TEXT NOT NULL,
                embedding TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_episodic_user ON episodic_entries(user_id)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_entries_per_user,
            detector: crate::labels::secret_detector::SecretDetector::new(),
        })
    }

    /// I-M2: rejects an empty `userId`. I-E1: `content` is scanned first;
    /// a finding stores the redacted text and sets `redacted=true` rather
    /// than failing the write.
    pub fn add(&self, req: AddEpisodicEntry, embedding: Vec<f32>) -> Result<EpisodicEntry> {
        anyhow::ensure!(
            !req.user_id.trim().is_empty(),
            "episodic memory requires a non-empty userId (I-M2)"
        );

        let findings = self.detector.scan(&req.content);
        let (content, redacted) = if findings.is_empty() {
            (req.content, false)
        } else {
            (self.detector.redact(&req.content), true)
        };

        let visibility = req
            .visibility
            .unwrap_or_else(|| super::default_visibility(&req.category, None));

        let now = Utc::now();
        let entry = EpisodicEntry {
            id: uuid::Uuid::new_v4().to_string(),
            namespace: req.namespace,
            user_id: req.user_id,
            category: req.category,
            content,
            redacted,
            visibility,
            created_by: req.created_by,
            session_id: req.session_id,
            turn_number: req.turn_number,
            participants: req.participants,
            created_at: now,
            last_accessed_at: now,
        };

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("episodic db lock poisoned: {e}"))?;
        conn.execute(
            "INSERT INTO episodic_entries
                (id, namespace, user_id, category, content, redacted, visibility, created_by,
                 session_id, turn_number, participants, embedding, created_at, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                entry.id,
                entry.namespace,
                entry.user_id,
                entry.category,
                entry.content,
                entry.redacted as i64,
                entry.visibility.as_str(),
                entry.created_by,
                entry.session_id,
                entry.turn_number,
                serde_json::to_string(&entry.participants)?,
                serde_json::to_string(&embedding)?,
                entry.created_at.to_rfc3339(),
                entry.last_accessed_at.to_rfc3339(),
            ],
        )?;

        self.evict_over_capacity(&conn, &entry.user_id)?;

        Ok(entry)
    }

    /// Retention: keep only the `max_entries_per_user` most recent entries
    /// for this user, oldest first to go.
    fn evict_over_capacity(&self, conn: &Connection, user_id: &str) -> Result<()> {
        if self.max_entries_per_user == 0 {
            return Ok(());
        }
        conn.execute(
            "DELETE FROM episodic_entries WHERE user_id = ?1 AND id NOT IN (
                 SELECT id FROM episodic_entries WHERE user_id = ?1
                 ORDER BY created_at DESC LIMIT ?2
             )",
            params![user_id, self.max_entries_per_user as i64],
        )?;
        Ok(())
    }

    /// I-M1/I-M2: `user_id` must be non-empty; every row is additionally
    /// filtered by `visibility.is_visible_to(requester_id, ...)` before
    /// ranking, and hits below `min_similarity` are dropped regardless of
    /// rank.
    pub fn search(
        &self,
        requester_id: &str,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<EpisodicHit>> {
        anyhow::ensure!(
            !user_id.trim().is_empty(),
            "episodic memory requires a non-empty userId (I-M2)"
        );

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("episodic db lock poisoned: {e}"))?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM episodic_entries WHERE user_id = ?1"
        ))?;
        let rows: Vec<RawRow> = stmt
            .query_map(params![user_id], row_to_raw)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut hits = Vec::new();
        for raw in rows {
            let (entry, embedding) = raw.into_entry_and_embedding()?;
            if !entry.visibility.is_visible_to(requester_id, &entry.user_id) {
                continue;
            }
            let similarity = cosine_similarity(query_embedding, &embedding);
            if similarity < min_similarity {
                continue;
            }
            hits.push(EpisodicHit { entry, similarity });
        }

        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests;
