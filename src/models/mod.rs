//! Data models for Recall.
//!
//! Defines the core entity types stored in the record store plus the DTOs
//! returned by the coordinator facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Generate a new UUID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

// ============================================================================
// Projects
// ============================================================================

/// Project record from the database.
///
/// Created on first agent activity; removed by the retention sweeper once
/// `last_accessed_at` falls outside the retention window.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

// ============================================================================
// Tasks
// ============================================================================

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Task record from the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub description: String,
    pub status: String,
    pub assignee_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Typed view of the stored status.
    pub fn task_status(&self) -> Option<TaskStatus> {
        TaskStatus::parse(&self.status)
    }
}

// ============================================================================
// Conversations
// ============================================================================

/// Conversation turn. Immutable once written.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub project_id: String,
    pub role: String,
    pub agent_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Artifact references
// ============================================================================

/// Maximum inline content size; anything larger must be registered as a
/// pointer instead of stored in a record body.
pub const ARTIFACT_INLINE_THRESHOLD_BYTES: i64 = 10_000;

/// Where an artifact's bytes actually live.
///
/// Tagged variant rather than three nullable fields so "exactly one pointer
/// set" is structural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArtifactPointer {
    /// Object-storage path, e.g. `bucket/key/report.pdf`.
    ObjectStore(String),
    /// Filesystem path on the host that produced the artifact.
    LocalPath(String),
    /// Pass-through external URL.
    ExternalUrl(String),
}

impl ArtifactPointer {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ObjectStore(_) => "object_store",
            Self::LocalPath(_) => "local_path",
            Self::ExternalUrl(_) => "external_url",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::ObjectStore(v) | Self::LocalPath(v) | Self::ExternalUrl(v) => v,
        }
    }

    /// Rebuild from the two stored columns.
    pub fn from_parts(kind: &str, value: &str) -> Result<Self> {
        match kind {
            "object_store" => Ok(Self::ObjectStore(value.to_string())),
            "local_path" => Ok(Self::LocalPath(value.to_string())),
            "external_url" => Ok(Self::ExternalUrl(value.to_string())),
            other => Err(Error::Validation(format!(
                "Unknown artifact pointer kind: {}",
                other
            ))),
        }
    }
}

/// Artifact reference record. Stores the pointer, size and type only,
/// never the referenced bytes.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub id: String,
    pub project_id: String,
    pub artifact_type: String,
    pub name: String,
    pub pointer_kind: String,
    pub pointer: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl ArtifactReference {
    /// Typed pointer view.
    pub fn artifact_pointer(&self) -> Result<ArtifactPointer> {
        ArtifactPointer::from_parts(&self.pointer_kind, &self.pointer)
    }
}

// ============================================================================
// Agent memories
// ============================================================================

/// Kind of learned pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    SuccessPattern,
    FailurePattern,
    ContextNote,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuccessPattern => "success_pattern",
            Self::FailurePattern => "failure_pattern",
            Self::ContextNote => "context_note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success_pattern" => Some(Self::SuccessPattern),
            "failure_pattern" => Some(Self::FailurePattern),
            "context_note" => Some(Self::ContextNote),
            _ => None,
        }
    }
}

/// Learned pattern shared across agents.
///
/// Importance drives retrieval ranking; access tracking is the only state
/// mutated after creation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AgentMemory {
    pub id: String,
    pub agent_id: String,
    pub project_id: String,
    pub kind: String,
    pub content: String,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: i64,
}

impl AgentMemory {
    pub fn memory_kind(&self) -> Option<MemoryKind> {
        MemoryKind::parse(&self.kind)
    }
}

// ============================================================================
// Delegation
// ============================================================================

/// Node in the per-project agent hand-off tree.
///
/// Parent is stored as an id, not a reference; `children` is derived from
/// the arena at query time and never persisted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DelegationNode {
    pub project_id: String,
    pub agent_id: String,
    pub parent_agent_id: Option<String>,
    pub level: i64,
    pub delegated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub children: Vec<String>,
}

// ============================================================================
// Coordinator DTOs
// ============================================================================

/// A task with its retrieval score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedTask {
    pub task: Task,
    pub score: f32,
}

/// Context bundle returned by `get_context` and stored in the cache tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub project_id: String,
    pub fingerprint: String,
    pub tasks: Vec<RankedTask>,
    pub conversations: Vec<Conversation>,
    pub memories: Vec<AgentMemory>,
    /// Wall time spent assembling the bundle.
    pub timing_ms: u64,
    pub cache_hit: bool,
    /// True when a tier timed out or errored and the bundle only reflects
    /// record-store results.
    pub partial: bool,
}

/// Result of a cache invalidation check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationResult {
    pub invalidated: bool,
    pub reason: String,
}
