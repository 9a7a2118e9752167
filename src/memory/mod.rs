//! Memory manager (§4.8, C8): a three-tier memory facade sitting behind
//! one API — working memory (per-session, in-process), episodic memory
//! (durable, vector-searchable), and semantic memory (durable, structured
//! facts) — plus the shared [`Visibility`] lattice all three tiers filter
//! reads through.
//!
//! Grounded on `agent::memory::memory_db::MemoryDB` for the SQLite
//! conventions the two durable tiers share, generalized here into three
//! focused stores instead of the teacher's single hybrid-search table,
//! since this system's memory categories (episodic vs. semantic) need
//! different schemas and different read paths.

pub mod embedding;
pub mod episodic;
pub mod semantic;
pub mod working;

use crate::audit::AuditLogger;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

pub use embedding::{cosine_similarity, EmbeddingGenerator};
pub use episodic::{AddEpisodicEntry, EpisodicEntry, EpisodicHit, EpisodicStore};
pub use semantic::{FactType, SemanticFact, SemanticStore, SemanticWriteOutcome, WriteSemanticFact};
pub use working::{WorkingMemory, WorkingMessage};

/// Who may see a piece of memory, independent of the trust/sensitivity
/// label attached to its content (§3, I-M1). There is no family-membership
/// directory elsewhere in this system, so `Family`/`Agent` are modeled as
/// always visible — a deliberate simplification rather than an omission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    /// Visible only to the user who owns the memory.
    Owner,
    /// Visible to any member of the owning user's family.
    Family,
    /// Visible only to one specific, named user (not necessarily the
    /// owner) — used when a memory is explicitly about someone else.
    User(String),
    /// Visible to the orchestrating agent regardless of requester.
    Agent,
}

impl Visibility {
    pub fn as_str(&self) -> String {
        match self {
            Visibility::Owner => "owner".to_string(),
            Visibility::Family => "family".to_string(),
            Visibility::User(id) => format!("user:{id}"),
            Visibility::Agent => "agent".to_string(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some(("user", id)) => Visibility::User(id.to_string()),
            _ => match s {
                "family" => Visibility::Family,
                "agent" => Visibility::Agent,
                _ => Visibility::Owner,
            },
        }
    }

    /// I-M1: does `requester_id` get to see a memory with this visibility,
    /// owned by `owner_user_id`?
    pub fn is_visible_to(&self, requester_id: &str, owner_user_id: &str) -> bool {
        match self {
            Visibility::Owner => requester_id == owner_user_id,
            Visibility::Family | Visibility::Agent => true,
            Visibility::User(id) => requester_id == id,
        }
    }
}

/// Default visibility for a memory when the caller doesn't specify one.
/// `health`/`financial` categories default to owner-only; `family`
/// defaults to family-wide; a single-subject fact about someone other
/// than the requester defaults to that subject's user scope; everything
/// else defaults to owner-only.
pub fn default_visibility(category: &str, single_subject_other_user: Option<&str>) -> Visibility {
    match category {
        "health" | "financial" => Visibility::Owner,
        "family" => Visibility::Family,
        _ => match single_subject_other_user {
            Some(subject) => Visibility::User(subject.to_string()),
            None => Visibility::Owner,
        },
    }
}

/// Facade over the three memory tiers. Construction wires the durable
/// stores to disk and, optionally, to a shared [`AuditLogger`] so that
/// semantic memory's confirmed-promotion events land in the same audit
/// trail as the rest of the system.
pub struct MemoryManager {
    pub episodic: EpisodicStore,
    pub semantic: SemanticStore,
    working: std::sync::Mutex<std::collections::HashMap<String, Arc<std::sync::Mutex<WorkingMemory>>>>,
    embedder: Box<dyn EmbeddingGenerator>,
}

impl MemoryManager {
    pub fn new(
        dir: impl AsRef<Path>,
        max_entries_per_user: usize,
        embedder: Box<dyn EmbeddingGenerator>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let episodic = EpisodicStore::open(dir.join("episodic.sqlite3"), max_entries_per_user)?;
        let semantic = SemanticStore::open(dir.join("semantic.sqlite3"))?;
        Ok(Self {
            episodic,
            semantic,
            working: std::sync::Mutex::new(std::collections::HashMap::new()),
            embedder,
        })
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.semantic = self.semantic.with_audit(audit);
        self
    }

    /// Get or create the working memory buffer for a session, shared so
    /// every caller holding it sees the same live buffer.
    pub fn working_memory(
        &self,
        session_id: &str,
        capacity: usize,
        token_cap: usize,
    ) -> Arc<std::sync::Mutex<WorkingMemory>> {
        let mut sessions = self
            .working
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(std::sync::Mutex::new(WorkingMemory::new(capacity, token_cap))))
            .clone()
    }

    pub fn drop_working(&self, session_id: &str) {
        let mut sessions = self
            .working
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }

    /// Embed `content` and store it as an episodic entry in one call.
    pub async fn remember_episode(&self, req: AddEpisodicEntry) -> Result<EpisodicEntry> {
        let embedding = self.embedder.embed(&req.content).await?;
        self.episodic.add(req, embedding)
    }

    /// Embed `query` and search episodic memory in one call.
    pub async fn recall_episodes(
        &self,
        requester_id: &str,
        user_id: &str,
        query: &str,
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<EpisodicHit>> {
        let embedding = self.embedder.embed(query).await?;
        self.episodic.search(requester_id, user_id, &embedding, limit, min_similarity)
    }
}
