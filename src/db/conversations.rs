//! Conversation database queries.
//!
//! Conversation turns are immutable once written; saving an existing id
//! is a no-op rather than an update.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::Conversation;

use super::search::{index_entity, remove_entities_before};
use super::DbPool;

/// Insert a conversation turn. Re-saving an existing id leaves the stored
/// turn untouched, preserving immutability while keeping the call
/// idempotent.
pub async fn save_conversation(pool: &DbPool, conversation: &Conversation) -> Result<()> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO conversations (id, project_id, role, agent_id, content, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(&conversation.id)
    .bind(&conversation.project_id)
    .bind(&conversation.role)
    .bind(&conversation.agent_id)
    .bind(&conversation.content)
    .bind(conversation.created_at)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() > 0 {
        index_entity(
            &mut tx,
            "conversation",
            &conversation.id,
            &conversation.project_id,
            None,
            conversation.created_at,
            &conversation.content,
        )
        .await?;
    }

    tx.commit().await?;

    Ok(())
}

/// Get a conversation turn by id.
pub async fn get_conversation(pool: &DbPool, id: &str) -> Result<Conversation> {
    sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Conversation not found: {}", id)))
}

/// List conversation turns for a project, newest first.
pub async fn query_conversations(
    pool: &DbPool,
    project_id: &str,
    agent_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Conversation>> {
    let mut sql = String::from("SELECT * FROM conversations WHERE project_id = ?");
    if agent_id.is_some() {
        sql.push_str(" AND agent_id = ?");
    }
    sql.push_str(" ORDER BY created_at DESC, id ASC LIMIT ?");

    let mut q = sqlx::query_as::<_, Conversation>(&sql).bind(project_id);
    if let Some(a) = agent_id {
        q = q.bind(a);
    }
    q = q.bind(limit);

    q.fetch_all(pool).await.map_err(Error::Database)
}

/// Recent conversation turns for a set of agents, newest first. Used for
/// delegation inheritance, where a child's context joins in its ancestors'
/// recent turns.
pub async fn query_conversations_for_agents(
    pool: &DbPool,
    project_id: &str,
    agent_ids: &[String],
    limit: i64,
) -> Result<Vec<Conversation>> {
    if agent_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; agent_ids.len()].join(", ");
    let sql = format!(
        "SELECT * FROM conversations WHERE project_id = ? AND agent_id IN ({}) \
         ORDER BY created_at DESC, id ASC LIMIT ?",
        placeholders
    );

    let mut q = sqlx::query_as::<_, Conversation>(&sql).bind(project_id);
    for id in agent_ids {
        q = q.bind(id);
    }
    q = q.bind(limit);

    q.fetch_all(pool).await.map_err(Error::Database)
}

/// Delete conversation turns strictly older than the cutoff. Returns
/// (rows deleted, estimated bytes freed).
pub async fn cleanup_conversations(pool: &DbPool, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
    let mut tx = pool.begin().await?;

    let (bytes,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(LENGTH(content)), 0) FROM conversations WHERE created_at < ?",
    )
    .bind(cutoff)
    .fetch_one(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM conversations WHERE created_at < ?")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

    remove_entities_before(&mut tx, "conversation", cutoff).await?;

    tx.commit().await?;

    Ok((result.rows_affected(), bytes as u64))
}
