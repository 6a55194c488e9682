//! Full-text search over the record store.
//!
//! One FTS5 index spans every searchable entity kind (tasks, conversations,
//! agent memories, artifacts). The index rows are maintained inside the
//! same transaction as the entity write, so a committed entity is always
//! searchable and a deleted one never is.
//!
//! Ranking blends bm25 relevance with recency; ties are broken by entity
//! id so results are deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::error::{Error, Result};
use crate::models::now;

use super::DbPool;

/// Half-life in days for the recency component of the ranking blend.
const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;

/// Weight of bm25 relevance vs recency in the combined score.
const RELEVANCE_WEIGHT: f64 = 0.6;

/// A ranked full-text match with a display snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity_id: String,
    pub entity_kind: String,
    pub project_id: String,
    pub task_id: Option<String>,
    pub snippet: String,
    /// Normalized bm25 relevance in [0, 1].
    pub relevance: f32,
    /// Relevance blended with recency; the sort key.
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

/// Insert or replace the index row for an entity.
///
/// Must run on the same connection as the entity write so both commit
/// atomically.
pub(crate) async fn index_entity(
    conn: &mut SqliteConnection,
    entity_kind: &str,
    entity_id: &str,
    project_id: &str,
    task_id: Option<&str>,
    created_at: DateTime<Utc>,
    body: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM search_index WHERE entity_kind = ? AND entity_id = ?")
        .bind(entity_kind)
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO search_index (entity_id, entity_kind, project_id, task_id, created_at, body)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entity_id)
    .bind(entity_kind)
    .bind(project_id)
    .bind(task_id)
    .bind(created_at)
    .bind(body)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Remove the index row for an entity.
pub(crate) async fn remove_entity(
    conn: &mut SqliteConnection,
    entity_kind: &str,
    entity_id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM search_index WHERE entity_kind = ? AND entity_id = ?")
        .bind(entity_kind)
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Remove index rows for a kind that are strictly older than the cutoff.
pub(crate) async fn remove_entities_before(
    conn: &mut SqliteConnection,
    entity_kind: &str,
    cutoff: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("DELETE FROM search_index WHERE entity_kind = ? AND created_at < ?")
        .bind(entity_kind)
        .bind(cutoff)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Turn free text into an FTS5 match expression.
///
/// Tokens are individually quoted and OR-joined so user input can never
/// break the FTS query syntax; porter stemming handles inflection.
fn build_match_query(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

#[derive(sqlx::FromRow)]
struct RawHit {
    entity_id: String,
    entity_kind: String,
    project_id: String,
    task_id: Option<String>,
    snippet: String,
    rank: f64,
    created_at: DateTime<Utc>,
}

/// Ranked full-text search across all indexed entity kinds.
pub async fn search_records(
    pool: &DbPool,
    text: &str,
    project_id: Option<&str>,
    task_id: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let match_query = match build_match_query(text) {
        Some(q) => q,
        None => return Ok(Vec::new()),
    };

    let mut sql = String::from(
        r#"
        SELECT entity_id, entity_kind, project_id, task_id, created_at,
               snippet(search_index, 5, '[', ']', '…', 12) AS snippet,
               bm25(search_index) AS rank
        FROM search_index
        WHERE search_index MATCH ?
        "#,
    );

    if project_id.is_some() {
        sql.push_str(" AND project_id = ?");
    }
    if task_id.is_some() {
        sql.push_str(" AND task_id = ?");
    }

    // Over-fetch so the recency blend can reorder before truncation
    sql.push_str(" ORDER BY rank LIMIT ?");
    let fetch_limit = (limit * 3).max(limit) as i64;

    let mut q = sqlx::query_as::<_, RawHit>(&sql).bind(&match_query);
    if let Some(p) = project_id {
        q = q.bind(p);
    }
    if let Some(t) = task_id {
        q = q.bind(t);
    }
    q = q.bind(fetch_limit);

    let rows = q.fetch_all(pool).await.map_err(Error::Database)?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    // bm25 returns more-negative values for better matches
    let best = rows.iter().map(|r| -r.rank).fold(f64::MIN, f64::max);
    let ts = now();

    let mut hits: Vec<SearchHit> = rows
        .into_iter()
        .map(|r| {
            let relevance = if best > 0.0 { (-r.rank / best).clamp(0.0, 1.0) } else { 0.0 };
            let age_days =
                (ts.signed_duration_since(r.created_at).num_seconds() as f64 / 86400.0).max(0.0);
            let recency = 0.5_f64.powf(age_days / RECENCY_HALF_LIFE_DAYS);
            let score = RELEVANCE_WEIGHT * relevance + (1.0 - RELEVANCE_WEIGHT) * recency;

            SearchHit {
                entity_id: r.entity_id,
                entity_kind: r.entity_kind,
                project_id: r.project_id,
                task_id: r.task_id,
                snippet: r.snippet,
                relevance: relevance as f32,
                score: score as f32,
                created_at: r.created_at,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    hits.truncate(limit);

    Ok(hits)
}
