//! Delegation arena queries.
//!
//! One row per (project, agent). Parents are stored as ids, never object
//! references, so tree walks are id lookups and cannot chase a cycle of
//! live pointers.

use crate::error::{Error, Result};
use crate::models::{now, DelegationNode};

use super::DbPool;

/// Upsert a delegation node.
pub async fn save_delegation_node(pool: &DbPool, node: &DelegationNode) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO delegation_nodes (project_id, agent_id, parent_agent_id, level, delegated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(project_id, agent_id) DO UPDATE SET
            parent_agent_id = excluded.parent_agent_id,
            level = excluded.level,
            delegated_at = excluded.delegated_at
        "#,
    )
    .bind(&node.project_id)
    .bind(&node.agent_id)
    .bind(&node.parent_agent_id)
    .bind(node.level)
    .bind(node.delegated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a delegation node with its children populated.
pub async fn get_delegation_node(
    pool: &DbPool,
    project_id: &str,
    agent_id: &str,
) -> Result<Option<DelegationNode>> {
    let node = sqlx::query_as::<_, DelegationNode>(
        "SELECT * FROM delegation_nodes WHERE project_id = ? AND agent_id = ?",
    )
    .bind(project_id)
    .bind(agent_id)
    .fetch_optional(pool)
    .await?;

    let mut node = match node {
        Some(n) => n,
        None => return Ok(None),
    };

    node.children = child_agent_ids(pool, project_id, agent_id).await?;

    Ok(Some(node))
}

/// Agent ids delegated to directly by the given agent.
pub async fn child_agent_ids(
    pool: &DbPool,
    project_id: &str,
    agent_id: &str,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT agent_id FROM delegation_nodes \
         WHERE project_id = ? AND parent_agent_id = ? ORDER BY delegated_at ASC, agent_id ASC",
    )
    .bind(project_id)
    .bind(agent_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Create or update the parent and child rows for a hand-off. The child's
/// level becomes parent-level + 1; an unknown parent is created as a root.
pub async fn record_delegation(
    pool: &DbPool,
    project_id: &str,
    parent_agent_id: &str,
    child_agent_id: &str,
) -> Result<DelegationNode> {
    if parent_agent_id == child_agent_id {
        return Err(Error::Validation(
            "An agent cannot delegate to itself".to_string(),
        ));
    }

    let parent = get_delegation_node(pool, project_id, parent_agent_id).await?;

    let parent_level = match parent {
        Some(p) => p.level,
        None => {
            save_delegation_node(
                pool,
                &DelegationNode {
                    project_id: project_id.to_string(),
                    agent_id: parent_agent_id.to_string(),
                    parent_agent_id: None,
                    level: 0,
                    delegated_at: now(),
                    children: Vec::new(),
                },
            )
            .await?;
            0
        }
    };

    let child = DelegationNode {
        project_id: project_id.to_string(),
        agent_id: child_agent_id.to_string(),
        parent_agent_id: Some(parent_agent_id.to_string()),
        level: parent_level + 1,
        delegated_at: now(),
        children: Vec::new(),
    };
    save_delegation_node(pool, &child).await?;

    Ok(child)
}

/// Walk parent ids from the given agent up to a root. The walk is bounded
/// by the number of nodes in the project's tree, so a corrupted parent
/// chain terminates instead of looping.
pub async fn path_to_root(
    pool: &DbPool,
    project_id: &str,
    agent_id: &str,
) -> Result<Vec<DelegationNode>> {
    let (tree_size,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM delegation_nodes WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(pool)
            .await?;

    let mut path = Vec::new();
    let mut current = agent_id.to_string();

    for _ in 0..=tree_size {
        let node = match get_delegation_node(pool, project_id, &current).await? {
            Some(n) => n,
            None => break,
        };

        let parent = node.parent_agent_id.clone();
        path.push(node);

        match parent {
            Some(p) => current = p,
            None => return Ok(path),
        }
    }

    if path.is_empty() {
        return Err(Error::NotFound(format!(
            "Agent {} has no delegation node in project {}",
            agent_id, project_id
        )));
    }

    // Chain exhausted the node budget without reaching a root
    Err(Error::Internal(format!(
        "Delegation chain for agent {} does not terminate at a root",
        agent_id
    )))
}

/// Discard a project's delegation tree. Called on project completion.
pub async fn clear_delegations(pool: &DbPool, project_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM delegation_nodes WHERE project_id = ?")
        .bind(project_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, initialize_schema};

    async fn setup_test_db() -> DbPool {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_record_delegation_sets_levels() {
        let pool = setup_test_db().await;

        let child = record_delegation(&pool, "proj-1", "orchestrator", "worker-1")
            .await
            .unwrap();
        assert_eq!(child.level, 1);

        let grandchild = record_delegation(&pool, "proj-1", "worker-1", "worker-2")
            .await
            .unwrap();
        assert_eq!(grandchild.level, 2);

        let root = get_delegation_node(&pool, "proj-1", "orchestrator")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(root.level, 0);
        assert!(root.parent_agent_id.is_none());
        assert_eq!(root.children, vec!["worker-1".to_string()]);
    }

    #[tokio::test]
    async fn test_path_to_root_order() {
        let pool = setup_test_db().await;

        record_delegation(&pool, "proj-1", "orchestrator", "worker-1").await.unwrap();
        record_delegation(&pool, "proj-1", "worker-1", "worker-2").await.unwrap();

        let path = path_to_root(&pool, "proj-1", "worker-2").await.unwrap();
        let ids: Vec<&str> = path.iter().map(|n| n.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["worker-2", "worker-1", "orchestrator"]);
    }

    #[tokio::test]
    async fn test_self_delegation_rejected() {
        let pool = setup_test_db().await;
        let result = record_delegation(&pool, "proj-1", "agent-a", "agent-a").await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_corrupted_cycle_terminates() {
        let pool = setup_test_db().await;

        record_delegation(&pool, "proj-1", "a", "b").await.unwrap();
        // Manufacture a cycle directly in the arena
        sqlx::query(
            "UPDATE delegation_nodes SET parent_agent_id = 'b' WHERE project_id = 'proj-1' AND agent_id = 'a'",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = path_to_root(&pool, "proj-1", "b").await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_clear() {
        let pool = setup_test_db().await;

        record_delegation(&pool, "proj-1", "a", "b").await.unwrap();
        let cleared = clear_delegations(&pool, "proj-1").await.unwrap();
        assert_eq!(cleared, 2);

        assert!(get_delegation_node(&pool, "proj-1", "a").await.unwrap().is_none());
    }
}
