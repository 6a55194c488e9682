//! Agent memory database queries.
//!
//! Learned patterns shared across agents. After creation only access
//! tracking and importance re-scoring mutate a memory.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{now, AgentMemory, MemoryKind};

use super::search::{index_entity, remove_entities_before};
use super::DbPool;

/// Upsert an agent memory by id and refresh its index row in the same
/// transaction.
pub async fn save_memory(pool: &DbPool, memory: &AgentMemory) -> Result<()> {
    if MemoryKind::parse(&memory.kind).is_none() {
        return Err(Error::Validation(format!(
            "Unknown memory kind: {}",
            memory.kind
        )));
    }
    if !(0.0..=1.0).contains(&memory.importance) {
        return Err(Error::Validation(format!(
            "Importance must be in [0, 1], got {}",
            memory.importance
        )));
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO agent_memories (
            id, agent_id, project_id, kind, content, importance,
            created_at, last_accessed_at, access_count
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            content = excluded.content,
            importance = excluded.importance
        "#,
    )
    .bind(&memory.id)
    .bind(&memory.agent_id)
    .bind(&memory.project_id)
    .bind(&memory.kind)
    .bind(&memory.content)
    .bind(memory.importance)
    .bind(memory.created_at)
    .bind(memory.last_accessed_at)
    .bind(memory.access_count)
    .execute(&mut *tx)
    .await?;

    index_entity(
        &mut tx,
        "memory",
        &memory.id,
        &memory.project_id,
        None,
        memory.created_at,
        &memory.content,
    )
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Get a memory by id.
pub async fn get_memory(pool: &DbPool, id: &str) -> Result<AgentMemory> {
    sqlx::query_as::<_, AgentMemory>("SELECT * FROM agent_memories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Memory not found: {}", id)))
}

/// List memories for a project, newest first, optionally filtered by kind
/// or agent.
pub async fn query_memories(
    pool: &DbPool,
    project_id: &str,
    kind: Option<MemoryKind>,
    agent_id: Option<&str>,
    limit: i64,
) -> Result<Vec<AgentMemory>> {
    let mut sql = String::from("SELECT * FROM agent_memories WHERE project_id = ?");
    if kind.is_some() {
        sql.push_str(" AND kind = ?");
    }
    if agent_id.is_some() {
        sql.push_str(" AND agent_id = ?");
    }
    sql.push_str(" ORDER BY created_at DESC, id ASC LIMIT ?");

    let mut q = sqlx::query_as::<_, AgentMemory>(&sql).bind(project_id);
    if let Some(k) = kind {
        q = q.bind(k.as_str());
    }
    if let Some(a) = agent_id {
        q = q.bind(a);
    }
    q = q.bind(limit);

    q.fetch_all(pool).await.map_err(Error::Database)
}

/// Highest-importance memories for a set of agents. Used for delegation
/// inheritance: a child agent's context joins in what its ancestors
/// learned, without copying rows.
pub async fn query_memories_for_agents(
    pool: &DbPool,
    project_id: &str,
    agent_ids: &[String],
    limit: i64,
) -> Result<Vec<AgentMemory>> {
    if agent_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; agent_ids.len()].join(", ");
    let sql = format!(
        "SELECT * FROM agent_memories WHERE project_id = ? AND agent_id IN ({}) \
         ORDER BY importance DESC, created_at DESC, id ASC LIMIT ?",
        placeholders
    );

    let mut q = sqlx::query_as::<_, AgentMemory>(&sql).bind(project_id);
    for id in agent_ids {
        q = q.bind(id);
    }
    q = q.bind(limit);

    q.fetch_all(pool).await.map_err(Error::Database)
}

/// Fetch memories by a list of ids.
pub async fn get_memories_by_ids(pool: &DbPool, ids: &[String]) -> Result<Vec<AgentMemory>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("SELECT * FROM agent_memories WHERE id IN ({})", placeholders);

    let mut q = sqlx::query_as::<_, AgentMemory>(&sql);
    for id in ids {
        q = q.bind(id);
    }

    q.fetch_all(pool).await.map_err(Error::Database)
}

/// Record that memories were returned to a caller: bump access_count and
/// last_accessed_at. Best-effort; failures are swallowed by the caller.
pub async fn track_memory_access(pool: &DbPool, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let ts = now();
    for id in ids {
        sqlx::query(
            r#"
            UPDATE agent_memories
            SET access_count = access_count + 1,
                last_accessed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(ts)
        .bind(id)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Re-score a memory's importance. The only post-creation mutation besides
/// access tracking.
pub async fn rescore_memory(pool: &DbPool, id: &str, importance: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&importance) {
        return Err(Error::Validation(format!(
            "Importance must be in [0, 1], got {}",
            importance
        )));
    }

    let result = sqlx::query("UPDATE agent_memories SET importance = ? WHERE id = ?")
        .bind(importance)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Memory not found: {}", id)));
    }

    Ok(())
}

/// Delete memories strictly older than the cutoff. Returns (rows deleted,
/// estimated bytes freed).
pub async fn cleanup_memories(pool: &DbPool, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
    let mut tx = pool.begin().await?;

    let (bytes,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(LENGTH(content)), 0) FROM agent_memories WHERE created_at < ?",
    )
    .bind(cutoff)
    .fetch_one(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM agent_memories WHERE created_at < ?")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

    remove_entities_before(&mut tx, "memory", cutoff).await?;

    tx.commit().await?;

    Ok((result.rows_affected(), bytes as u64))
}
