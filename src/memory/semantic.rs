//! Semantic memory: durable structured facts (§4.8, C8).
//!
//! Writes are gated by [`crate::labels::fc2_semantic_write`] (FC-2) and
//! I-SEM1: a fact whose label carries `untrusted` trust is rejected
//! unless the caller asserts `userConfirmed=true`, in which case the
//! label is promoted to `user` and the promotion is audited — the fact
//! id, original and promoted trust level, reason, and authorizer, never
//! the fact's content.

use super::Visibility;
use crate::audit::{AuditLogger, Severity};
use crate::labels::{fc2_semantic_write, ContentLabel, FlowDecision, TrustLevel};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactType {
    Preference,
    Entity,
    Relationship,
    Instruction,
}

impl FactType {
    fn as_str(self) -> &'static str {
        match self {
            FactType::Preference => "preference",
            FactType::Entity => "entity",
            FactType::Relationship => "relationship",
            FactType::Instruction => "instruction",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "preference" => Ok(FactType::Preference),
            "entity" => Ok(FactType::Entity),
            "relationship" => Ok(FactType::Relationship),
            "instruction" => Ok(FactType::Instruction),
            other => anyhow::bail!("unknown fact type '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SemanticFact {
    pub id: String,
    pub namespace: String,
    pub user_id: String,
    pub category: String,
    pub fact_type: FactType,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    pub source: String,
    pub visibility: Visibility,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Request to write one semantic fact.
pub struct WriteSemanticFact {
    pub namespace: String,
    pub user_id: String,
    pub category: String,
    pub fact_type: FactType,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    pub source: String,
    pub visibility: Option<Visibility>,
    pub created_by: String,
}

/// Outcome of [`SemanticStore::write`]. `Rejected`/`Ask` mirror
/// [`FlowDecision`] but carry the would-be fact's context for the caller
/// to decide what to do next (re-submit with `userConfirmed=true`, or
/// surface an approval prompt).
#[derive(Debug)]
pub enum SemanticWriteOutcome {
    Written(SemanticFact),
    Rejected { reason: String },
    Ask { reason: String, can_override: bool },
}

struct RawRow {
    id: String,
    namespace: String,
    user_id: String,
    category: String,
    fact_type: String,
    subject: String,
    predicate: String,
    object: String,
    confidence: f64,
    source: String,
    visibility: String,
    created_by: String,
    created_at: String,
    last_accessed_at: String,
}

fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        namespace: row.get(1)?,
        user_id: row.get(2)?,
        category: row.get(3)?,
        fact_type: row.get(4)?,
        subject: row.get(5)?,
        predicate: row.get(6)?,
        object: row.get(7)?,
        confidence: row.get(8)?,
        source: row.get(9)?,
        visibility: row.get(10)?,
        created_by: row.get(11)?,
        created_at: row.get(12)?,
        last_accessed_at: row.get(13)?,
    })
}

impl RawRow {
    fn into_fact(self) -> Result<SemanticFact> {
        Ok(SemanticFact {
            id: self.id,
            namespace: self.namespace,
            user_id: self.user_id,
            category: self.category,
            fact_type: FactType::parse(&self.fact_type)?,
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
            confidence: self.confidence as f32,
            source: self.source,
            visibility: Visibility::parse(&self.visibility),
            created_by: self.created_by,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .context("corrupt created_at column")?
                .with_timezone(&Utc),
            last_accessed_at: DateTime::parse_from_rfc3339(&self.last_accessed_at)
                .context("corrupt last_accessed_at column")?
                .with_timezone(&Utc),
        })
    }
}

const SELECT_COLUMNS: &str = "id, namespace, user_id, category, fact_type, subject, predicate, \
     object, confidence, source, visibility, created_by, created_at, last_accessed_at";

pub struct SemanticStore {
    conn: Mutex<Connection>,
    audit: Option<Arc<AuditLogger>>,
}

impl SemanticStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create semantic memory dir: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open semantic memory db: {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=3000;",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS semantic_facts (
                id TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                user_id TEXT NOT NULL,
                category TEXT NOT NULL,
                fact_type TEXT NOT NULL,
                subject TEXT NOT NULL,
                predicate TEXT NOT NULL,
                object TEXT NOT NULL,
                confidence REAL NOT NULL,
                source TEXT NOT NULL,
                visibility TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_semantic_user ON semantic_facts(user_id);
             CREATE INDEX IF NOT EXISTS idx_semantic_subject ON semantic_facts(user_id, subject);",
        )?;
        Ok(Self { conn: Mutex::new(conn), audit: None })
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// FC-2 + I-SEM1. `label` describes the trust/sensitivity of the
    /// content being turned into a fact; `user_confirmed` is the caller's
    /// assertion that a human has approved writing untrusted content.
    pub fn write(
        &self,
        req: WriteSemanticFact,
        label: &ContentLabel,
        user_confirmed: bool,
        authorized_by: &str,
    ) -> Result<SemanticWriteOutcome> {
        anyhow::ensure!(
            !req.user_id.trim().is_empty(),
            "semantic memory requires a non-empty userId (I-M2)"
        );

        let id = uuid::Uuid::new_v4().to_string();
        let mut label = label.clone();
        let mut decision = fc2_semantic_write(&label);

        if let FlowDecision::Denied { reason } = &decision {
            if label.trust_level != TrustLevel::Untrusted {
                return Ok(SemanticWriteOutcome::Rejected { reason: reason.clone() });
            }
            if !user_confirmed {
                return Ok(SemanticWriteOutcome::Rejected { reason: reason.clone() });
            }

            let original = label.trust_level;
            let reason_text = "user-confirmed semantic memory write of untrusted content";
            label.promote(TrustLevel::User, reason_text, authorized_by);
            if let Some(audit) = &self.audit {
                if let Err(e) = audit.log(
                    "memory",
                    "semantic_memory_write_confirmed",
                    Severity::Info,
                    serde_json::json!({
                        "factId": id,
                        "originalTrustLevel": format!("{original:?}").to_lowercase(),
                        "promotedTo": "user",
                        "reason": reason_text,
                        "authorizedBy": authorized_by,
                    }),
                ) {
                    warn!("failed to audit semantic memory write promotion: {e}");
                }
            }
            decision = fc2_semantic_write(&label);
        }

        match decision {
            FlowDecision::Denied { reason } => Ok(SemanticWriteOutcome::Rejected { reason }),
            FlowDecision::Ask { reason, can_override } => {
                Ok(SemanticWriteOutcome::Ask { reason, can_override })
            }
            FlowDecision::Allowed => {
                let visibility = req
                    .visibility
                    .unwrap_or_else(|| super::default_visibility(&req.category, Some(&req.subject)));
                let now = Utc::now();
                let fact = SemanticFact {
                    id,
                    namespace: req.namespace,
                    user_id: req.user_id,
                    category: req.category,
                    fact_type: req.fact_type,
                    subject: req.subject,
                    predicate: req.predicate,
                    object: req.object,
                    confidence: req.confidence.clamp(0.0, 1.0),
                    source: req.source,
                    visibility,
                    created_by: req.created_by,
                    created_at: now,
                    last_accessed_at: now,
                };
                self.insert(&fact)?;
                Ok(SemanticWriteOutcome::Written(fact))
            }
        }
    }

    fn insert(&self, fact: &SemanticFact) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("semantic db lock poisoned: {e}"))?;
        conn.execute(
            "INSERT INTO semantic_facts
                (id, namespace, user_id, category, fact_type, subject, predicate, object,
                 confidence, source, visibility, created_by, created_at, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                fact.id,
                fact.namespace,
                fact.user_id,
                fact.category,
                fact.fact_type.as_str(),
                fact.subject,
                fact.predicate,
                fact.object,
                fact.confidence as f64,
                fact.source,
                fact.visibility.as_str(),
                fact.created_by,
                fact.created_at.to_rfc3339(),
                fact.last_accessed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// I-M1/I-M2: `user_id` must be non-empty; every row is filtered by
    /// `visibility.is_visible_to(requester_id, ...)` before return.
    pub fn query(
        &self,
        requester_id: &str,
        user_id: &str,
        subject: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<SemanticFact>> {
        anyhow::ensure!(
            !user_id.trim().is_empty(),
            "semantic memory requires a non-empty userId (I-M2)"
        );

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("semantic db lock poisoned: {e}"))?;
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM semantic_facts WHERE user_id = ?1");
        let mut bound: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(user_id.to_string())];
        if let Some(subject) = subject {
            sql.push_str(&format!(" AND subject = ?{}", bound.len() + 1));
            bound.push(Box::new(subject.to_string()));
        }
        if let Some(category) = category {
            sql.push_str(&format!(" AND category = ?{}", bound.len() + 1));
            bound.push(Box::new(category.to_string()));
        }

        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::types::ToSql> = bound.iter().map(AsRef::as_ref).collect();
        let rows: Vec<RawRow> = stmt
            .query_map(params_ref.as_slice(), row_to_raw)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut facts = Vec::with_capacity(rows.len());
        for raw in rows {
            let fact = raw.into_fact()?;
            if fact.visibility.is_visible_to(requester_id, &fact.user_id) {
                facts.push(fact);
            }
        }
        Ok(facts)
    }
}
