//! Task database queries.
//!
//! Tasks favor append-only history: a status change is written as a new
//! save rather than churned in place by multiple writers.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{Task, TaskStatus};

use super::search::{index_entity, remove_entities_before};
use super::DbPool;

/// Upsert a task by id (idempotent) and refresh its full-text index row
/// in the same transaction.
pub async fn save_task(pool: &DbPool, task: &Task) -> Result<()> {
    if TaskStatus::parse(&task.status).is_none() {
        return Err(Error::Validation(format!(
            "Unknown task status: {}",
            task.status
        )));
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO tasks (id, project_id, description, status, assignee_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            description = excluded.description,
            status = excluded.status,
            assignee_id = excluded.assignee_id
        "#,
    )
    .bind(&task.id)
    .bind(&task.project_id)
    .bind(&task.description)
    .bind(&task.status)
    .bind(&task.assignee_id)
    .bind(task.created_at)
    .execute(&mut *tx)
    .await?;

    index_entity(
        &mut tx,
        "task",
        &task.id,
        &task.project_id,
        Some(&task.id),
        task.created_at,
        &task.description,
    )
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Get a task by id.
pub async fn get_task(pool: &DbPool, id: &str) -> Result<Task> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Task not found: {}", id)))
}

/// Get a task by id, returning None when absent.
pub async fn find_task(pool: &DbPool, id: &str) -> Result<Option<Task>> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(Error::Database)
}

/// List tasks for a project, newest first, with optional status and
/// assignee filters.
pub async fn query_tasks(
    pool: &DbPool,
    project_id: &str,
    status: Option<TaskStatus>,
    assignee_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Task>> {
    let mut sql = String::from("SELECT * FROM tasks WHERE project_id = ?");
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if assignee_id.is_some() {
        sql.push_str(" AND assignee_id = ?");
    }
    sql.push_str(" ORDER BY created_at DESC, id ASC LIMIT ?");

    let mut q = sqlx::query_as::<_, Task>(&sql).bind(project_id);
    if let Some(s) = status {
        q = q.bind(s.as_str());
    }
    if let Some(a) = assignee_id {
        q = q.bind(a);
    }
    q = q.bind(limit);

    q.fetch_all(pool).await.map_err(Error::Database)
}

/// Fetch tasks by a list of ids, preserving no particular order.
pub async fn get_tasks_by_ids(pool: &DbPool, ids: &[String]) -> Result<Vec<Task>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("SELECT * FROM tasks WHERE id IN ({})", placeholders);

    let mut q = sqlx::query_as::<_, Task>(&sql);
    for id in ids {
        q = q.bind(id);
    }

    q.fetch_all(pool).await.map_err(Error::Database)
}

/// Delete tasks strictly older than the cutoff, along with their index
/// rows. Returns (rows deleted, estimated bytes freed).
pub async fn cleanup_tasks(pool: &DbPool, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
    let mut tx = pool.begin().await?;

    let (bytes,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(LENGTH(description)), 0) FROM tasks WHERE created_at < ?",
    )
    .bind(cutoff)
    .fetch_one(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM tasks WHERE created_at < ?")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

    remove_entities_before(&mut tx, "task", cutoff).await?;

    tx.commit().await?;

    Ok((result.rows_affected(), bytes as u64))
}
