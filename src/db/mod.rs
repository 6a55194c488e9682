//! Database layer for Recall.
//!
//! Provides SQLite connection pooling and query modules for all record
//! tables, plus the full-text index and the per-table cleanup used by the
//! retention sweeper.

mod artifacts;
mod conversations;
mod delegations;
mod memories;
mod projects;
mod search;
mod tasks;

pub use artifacts::*;
pub use conversations::*;
pub use delegations::*;
pub use memories::*;
pub use projects::*;
pub use search::*;
pub use tasks::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

/// Type alias for the SQLite connection pool.
pub type DbPool = sqlx::SqlitePool;

/// Initialize the database connection pool.
///
/// Creates parent directories if needed and configures SQLite with
/// settings suited to many concurrent readers and a single writer.
pub async fn init_pool(path: &str) -> Result<DbPool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let options = SqliteConnectOptions::from_str(path)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30))
        .foreign_keys(true)
        // Negative cache_size means KB
        .pragma("cache_size", "-64000")
        .pragma("temp_store", "memory");

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect_with(options)
        .await?;

    info!("Database pool initialized: {}", path);

    Ok(pool)
}

/// Initialize the database schema.
///
/// Applies the complete schema from schema.sql. Uses IF NOT EXISTS
/// clauses so it's safe to run multiple times.
pub async fn initialize_schema(pool: &DbPool) -> Result<()> {
    let schema = include_str!("../../schema.sql");

    for statement in schema.split(';') {
        let clean_stmt: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let clean_stmt = clean_stmt.trim();
        if clean_stmt.is_empty() {
            continue;
        }
        sqlx::query(clean_stmt).execute(pool).await?;
    }

    info!("Database schema initialized");

    Ok(())
}

// ============================================================================
// Retention cleanup
// ============================================================================

/// Deletions performed against a single record table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCleanup {
    pub table: String,
    pub deleted: u64,
    pub bytes_freed: u64,
    /// Set when this table's cleanup transaction failed; other tables
    /// proceed regardless.
    pub error: Option<String>,
}

/// Aggregate result of a cleanup pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cutoff: DateTime<Utc>,
    pub tables: Vec<TableCleanup>,
}

impl CleanupReport {
    pub fn total_deleted(&self) -> u64 {
        self.tables.iter().map(|t| t.deleted).sum()
    }

    pub fn total_bytes_freed(&self) -> u64 {
        self.tables.iter().map(|t| t.bytes_freed).sum()
    }
}

/// Delete all entities older than the cutoff across every record table.
///
/// One transaction per table, never one global transaction: a failure in
/// one table must not block cleanup of the others. Entities exactly at the
/// cutoff are retained. Projects are aged by `last_accessed_at`, all other
/// entities by their own `created_at`.
pub async fn cleanup(pool: &DbPool, cutoff: DateTime<Utc>) -> CleanupReport {
    let mut tables = Vec::with_capacity(5);

    for (table, result) in [
        ("tasks", cleanup_tasks(pool, cutoff).await),
        ("conversations", cleanup_conversations(pool, cutoff).await),
        ("artifacts", cleanup_artifacts(pool, cutoff).await),
        ("agent_memories", cleanup_memories(pool, cutoff).await),
        ("projects", cleanup_projects(pool, cutoff).await),
    ] {
        match result {
            Ok((deleted, bytes_freed)) => tables.push(TableCleanup {
                table: table.to_string(),
                deleted,
                bytes_freed,
                error: None,
            }),
            Err(e) => {
                warn!(table, error = %e, "Table cleanup failed, continuing with remaining tables");
                tables.push(TableCleanup {
                    table: table.to_string(),
                    deleted: 0,
                    bytes_freed: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    CleanupReport { cutoff, tables }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_pool_in_memory() {
        let pool = init_pool(":memory:").await.unwrap();
        assert!(pool.size() > 0);
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        assert!(table_names.contains(&"projects"), "projects table missing");
        assert!(table_names.contains(&"tasks"), "tasks table missing");
        assert!(
            table_names.contains(&"conversations"),
            "conversations table missing"
        );
        assert!(table_names.contains(&"artifacts"), "artifacts table missing");
        assert!(
            table_names.contains(&"agent_memories"),
            "agent_memories table missing"
        );
        assert!(
            table_names.contains(&"delegation_nodes"),
            "delegation_nodes table missing"
        );
        assert!(
            table_names.contains(&"search_index"),
            "search_index table missing"
        );
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        initialize_schema(&pool).await.unwrap();
    }
}
