//! Artifact reference database queries.
//!
//! Only the pointer, size and type are persisted; the referenced bytes
//! never pass through this store.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::ArtifactReference;

use super::search::{index_entity, remove_entities_before};
use super::DbPool;

/// Upsert an artifact reference by id and index its name for search.
pub async fn save_artifact(pool: &DbPool, artifact: &ArtifactReference) -> Result<()> {
    // Validates the stored kind/value pair
    artifact.artifact_pointer()?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO artifacts (
            id, project_id, artifact_type, name, pointer_kind, pointer,
            size_bytes, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            artifact_type = excluded.artifact_type,
            name = excluded.name,
            pointer_kind = excluded.pointer_kind,
            pointer = excluded.pointer,
            size_bytes = excluded.size_bytes
        "#,
    )
    .bind(&artifact.id)
    .bind(&artifact.project_id)
    .bind(&artifact.artifact_type)
    .bind(&artifact.name)
    .bind(&artifact.pointer_kind)
    .bind(&artifact.pointer)
    .bind(artifact.size_bytes)
    .bind(artifact.created_at)
    .execute(&mut *tx)
    .await?;

    index_entity(
        &mut tx,
        "artifact",
        &artifact.id,
        &artifact.project_id,
        None,
        artifact.created_at,
        &artifact.name,
    )
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Get an artifact reference by id.
pub async fn get_artifact(pool: &DbPool, id: &str) -> Result<ArtifactReference> {
    sqlx::query_as::<_, ArtifactReference>("SELECT * FROM artifacts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Artifact not found: {}", id)))
}

/// List artifact references for a project, newest first.
pub async fn query_artifacts(pool: &DbPool, project_id: &str) -> Result<Vec<ArtifactReference>> {
    sqlx::query_as::<_, ArtifactReference>(
        "SELECT * FROM artifacts WHERE project_id = ? ORDER BY created_at DESC, id ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .map_err(Error::Database)
}

/// Delete artifact references strictly older than the cutoff. Returns
/// (rows deleted, estimated bytes freed). The estimate counts the pointer
/// text, not the referenced bytes, which this store never owns.
pub async fn cleanup_artifacts(pool: &DbPool, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
    let mut tx = pool.begin().await?;

    let (bytes,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(LENGTH(pointer) + LENGTH(name)), 0) FROM artifacts WHERE created_at < ?",
    )
    .bind(cutoff)
    .fetch_one(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM artifacts WHERE created_at < ?")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

    remove_entities_before(&mut tx, "artifact", cutoff).await?;

    tx.commit().await?;

    Ok((result.rows_affected(), bytes as u64))
}
