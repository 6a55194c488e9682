//! Project database queries.
//!
//! Projects are the top-level organizational unit. Retention is measured
//! from `last_accessed_at`, which every read and write path touches.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{now, Project};

use super::DbPool;

/// Create a new project. Fails with `AlreadyExists` on a duplicate id.
pub async fn create_project(pool: &DbPool, id: &str, name: &str) -> Result<Project> {
    let ts = now();
    sqlx::query_as::<_, Project>(
        r#"
        INSERT INTO projects (id, name, created_at, last_accessed_at)
        VALUES (?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(ts)
    .bind(ts)
    .fetch_one(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            Error::AlreadyExists(format!("Project '{}' already exists", id))
        }
        _ => Error::Database(e),
    })
}

/// Upsert a project by id (idempotent).
pub async fn save_project(pool: &DbPool, project: &Project) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO projects (id, name, created_at, last_accessed_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            last_accessed_at = excluded.last_accessed_at
        "#,
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(project.created_at)
    .bind(project.last_accessed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a project by id.
pub async fn get_project(pool: &DbPool, id: &str) -> Result<Project> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Project not found: {}", id)))
}

/// Get a project by id, returning None when absent.
pub async fn find_project(pool: &DbPool, id: &str) -> Result<Option<Project>> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(Error::Database)
}

/// List all projects, most recently accessed first.
pub async fn list_projects(pool: &DbPool) -> Result<Vec<Project>> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY last_accessed_at DESC")
        .fetch_all(pool)
        .await
        .map_err(Error::Database)
}

/// Update a project's last-accessed timestamp so retention counts from the
/// most recent activity. Missing projects are ignored.
pub async fn touch_project(pool: &DbPool, id: &str) -> Result<()> {
    sqlx::query("UPDATE projects SET last_accessed_at = ? WHERE id = ?")
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete a project and every entity belonging to it.
pub async fn delete_project(pool: &DbPool, id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Project not found: {}", id)));
    }

    for table in ["tasks", "conversations", "artifacts", "agent_memories", "delegation_nodes"] {
        sqlx::query(&format!("DELETE FROM {} WHERE project_id = ?", table))
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("DELETE FROM search_index WHERE project_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(())
}

/// Delete projects whose last access is strictly older than the cutoff.
/// Returns (rows deleted, estimated bytes freed).
pub async fn cleanup_projects(pool: &DbPool, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
    let mut tx = pool.begin().await?;

    let (bytes,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(LENGTH(name)), 0) FROM projects WHERE last_accessed_at < ?",
    )
    .bind(cutoff)
    .fetch_one(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM projects WHERE last_accessed_at < ?")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok((result.rows_affected(), bytes as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, initialize_schema};
    use chrono::Duration;

    async fn setup_test_db() -> DbPool {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_create_and_get_project() {
        let pool = setup_test_db().await;

        let project = create_project(&pool, "proj-1", "Test Project").await.unwrap();
        assert_eq!(project.id, "proj-1");

        let fetched = get_project(&pool, "proj-1").await.unwrap();
        assert_eq!(fetched.name, "Test Project");
    }

    #[tokio::test]
    async fn test_duplicate_id_conflict() {
        let pool = setup_test_db().await;

        create_project(&pool, "proj-1", "First").await.unwrap();
        let result = create_project(&pool, "proj-1", "Second").await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_get_missing_project() {
        let pool = setup_test_db().await;
        let result = get_project(&pool, "nope").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_touch_updates_last_accessed() {
        let pool = setup_test_db().await;

        let mut project = create_project(&pool, "proj-1", "P").await.unwrap();
        project.last_accessed_at = now() - Duration::days(10);
        save_project(&pool, &project).await.unwrap();

        touch_project(&pool, "proj-1").await.unwrap();
        let fetched = get_project(&pool, "proj-1").await.unwrap();
        assert!(fetched.last_accessed_at > now() - Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_cleanup_respects_cutoff_boundary() {
        let pool = setup_test_db().await;

        let cutoff = now() - Duration::days(30);

        let mut stale = create_project(&pool, "stale", "Old").await.unwrap();
        stale.last_accessed_at = cutoff - Duration::days(5);
        save_project(&pool, &stale).await.unwrap();

        // Exactly at the cutoff: retained, not deleted
        let mut boundary = create_project(&pool, "boundary", "Edge").await.unwrap();
        boundary.last_accessed_at = cutoff;
        save_project(&pool, &boundary).await.unwrap();

        create_project(&pool, "fresh", "New").await.unwrap();

        let (deleted, _) = cleanup_projects(&pool, cutoff).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(find_project(&pool, "stale").await.unwrap().is_none());
        assert!(find_project(&pool, "boundary").await.unwrap().is_some());
        assert!(find_project(&pool, "fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_project_cascades() {
        let pool = setup_test_db().await;

        create_project(&pool, "proj-1", "P").await.unwrap();
        sqlx::query(
            "INSERT INTO tasks (id, project_id, description, status, created_at) VALUES ('t1', 'proj-1', 'd', 'pending', ?)",
        )
        .bind(now())
        .execute(&pool)
        .await
        .unwrap();

        delete_project(&pool, "proj-1").await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE project_id = 'proj-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
