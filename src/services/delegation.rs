//! Delegation tracking and context inheritance.
//!
//! Records who handed work to whom within a project and answers the
//! question a sub-agent actually asks: "what did the agents above me see
//! and learn?". Inheritance is resolved at query time by joining on the
//! ancestor chain; nothing is copied when a delegation is recorded.

use tracing::{debug, info};

use crate::db::{self, DbPool};
use crate::error::Result;
use crate::models::{AgentMemory, Conversation, DelegationNode};

/// Ancestors consulted when assembling inherited context.
pub const MAX_INHERITED_ANCESTORS: usize = 5;

/// Conversation turns returned from the ancestor chain.
pub const MAX_INHERITED_CONVERSATIONS: usize = 20;

/// Memories returned from the ancestor chain, best importance first.
pub const MAX_INHERITED_MEMORIES: usize = 10;

/// Context a sub-agent inherits from the agents above it.
#[derive(Debug, Clone)]
pub struct InheritedContext {
    /// Ancestor agent ids, nearest first. Excludes the requesting agent.
    pub ancestor_agent_ids: Vec<String>,
    pub conversations: Vec<Conversation>,
    pub memories: Vec<AgentMemory>,
}

/// Service tracking delegation trees and resolving inherited context.
#[derive(Clone)]
pub struct DelegationTracker {
    pool: DbPool,
}

impl DelegationTracker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a hand-off from parent to child. An unknown parent is
    /// created as a root node.
    pub async fn record_delegation(
        &self,
        project_id: &str,
        parent_agent_id: &str,
        child_agent_id: &str,
    ) -> Result<DelegationNode> {
        let node =
            db::record_delegation(&self.pool, project_id, parent_agent_id, child_agent_id).await?;

        info!(
            project_id,
            parent = parent_agent_id,
            child = child_agent_id,
            level = node.level,
            "Recorded delegation"
        );

        Ok(node)
    }

    /// A node with its direct children, if the agent exists in the tree.
    pub async fn get_node(
        &self,
        project_id: &str,
        agent_id: &str,
    ) -> Result<Option<DelegationNode>> {
        db::get_delegation_node(&self.pool, project_id, agent_id).await
    }

    /// The chain from an agent up to its root, agent itself first.
    pub async fn path_to_root(
        &self,
        project_id: &str,
        agent_id: &str,
    ) -> Result<Vec<DelegationNode>> {
        db::path_to_root(&self.pool, project_id, agent_id).await
    }

    /// Conversations and memories visible to an agent through its
    /// ancestor chain. Bounded so deep trees cannot flood a context
    /// bundle.
    pub async fn inherited_context(
        &self,
        project_id: &str,
        agent_id: &str,
    ) -> Result<InheritedContext> {
        let path = match db::path_to_root(&self.pool, project_id, agent_id).await {
            Ok(path) => path,
            // An agent outside the tree inherits nothing
            Err(crate::error::Error::NotFound(_)) => {
                return Ok(InheritedContext {
                    ancestor_agent_ids: Vec::new(),
                    conversations: Vec::new(),
                    memories: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let ancestor_agent_ids: Vec<String> = path
            .into_iter()
            .skip(1) // the agent itself
            .take(MAX_INHERITED_ANCESTORS)
            .map(|node| node.agent_id)
            .collect();

        if ancestor_agent_ids.is_empty() {
            return Ok(InheritedContext {
                ancestor_agent_ids,
                conversations: Vec::new(),
                memories: Vec::new(),
            });
        }

        let conversations = db::query_conversations_for_agents(
            &self.pool,
            project_id,
            &ancestor_agent_ids,
            MAX_INHERITED_CONVERSATIONS as i64,
        )
        .await?;

        let memories = db::query_memories_for_agents(
            &self.pool,
            project_id,
            &ancestor_agent_ids,
            MAX_INHERITED_MEMORIES as i64,
        )
        .await?;

        debug!(
            project_id,
            agent_id,
            ancestors = ancestor_agent_ids.len(),
            conversations = conversations.len(),
            memories = memories.len(),
            "Resolved inherited context"
        );

        Ok(InheritedContext {
            ancestor_agent_ids,
            conversations,
            memories,
        })
    }

    /// Drop a project's delegation tree, typically on project completion.
    pub async fn clear(&self, project_id: &str) -> Result<u64> {
        let cleared = db::clear_delegations(&self.pool, project_id).await?;
        info!(project_id, cleared, "Cleared delegation tree");
        Ok(cleared)
    }
}
