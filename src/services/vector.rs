//! Vector tier abstraction.
//!
//! The coordinator talks to the vector tier through [`VectorIndex`] so the
//! Qdrant backend can be swapped for a stub in tests. The tier is always
//! degradable: callers treat its errors as partial results, never as
//! failures of the whole read.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Points are written in batches of this size.
pub const UPSERT_BATCH_SIZE: usize = 100;

/// Hybrid search boost per matched keyword.
pub const KEYWORD_BOOST: f32 = 0.1;

/// Cap on the total keyword boost for one hit.
pub const KEYWORD_BOOST_CAP: f32 = 0.3;

/// Payload key carrying the original text of a point.
pub const KEY_TEXT: &str = "text";

/// Payload key carrying the store-side entity id a point was written for.
pub const KEY_ENTITY_ID: &str = "entity_id";

/// Payload key carrying the entity kind ("task", "memory", ...).
pub const KEY_KIND: &str = "kind";

/// Payload key carrying the owning agent id, when there is one.
pub const KEY_AGENT_ID: &str = "agent_id";

/// A point to be written to the vector tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, Value>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A scored hit from the vector tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub metadata: HashMap<String, Value>,
}

impl VectorHit {
    /// Text payload of the hit, if the writer stored one.
    pub fn text(&self) -> Option<&str> {
        self.metadata.get(KEY_TEXT).and_then(Value::as_str)
    }

    /// Entity kind of the hit, if the writer stored one.
    pub fn kind(&self) -> Option<&str> {
        self.metadata.get(KEY_KIND).and_then(Value::as_str)
    }
}

/// Metadata filter applied during search.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub kind: Option<String>,
    pub agent_id: Option<String>,
}

impl VectorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    pub fn with_agent_id(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.agent_id.is_none()
    }
}

/// Interface to the vector tier. One isolated namespace per project.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Write records into a project's namespace, creating it on first use.
    /// Implementations batch writes at [`UPSERT_BATCH_SIZE`].
    async fn upsert(&self, project_id: &str, records: Vec<VectorRecord>) -> Result<()>;

    /// Nearest-neighbour search within a project's namespace.
    async fn search(
        &self,
        project_id: &str,
        embedding: Vec<f32>,
        top_k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<VectorHit>>;

    /// Similarity search re-ranked by exact keyword presence in the hit
    /// text. Each matched keyword adds [`KEYWORD_BOOST`] to the similarity
    /// score, capped at [`KEYWORD_BOOST_CAP`] per hit.
    async fn hybrid_search(
        &self,
        project_id: &str,
        embedding: Vec<f32>,
        keywords: &[String],
        top_k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<VectorHit>> {
        // Over-fetch so keyword boosts can promote hits from outside the
        // raw top-k.
        let candidates = self
            .search(project_id, embedding, top_k.saturating_mul(3).max(top_k), filter)
            .await?;

        let mut boosted: Vec<VectorHit> = candidates
            .into_iter()
            .map(|mut hit| {
                hit.score += keyword_boost(hit.text().unwrap_or(""), keywords);
                hit
            })
            .collect();

        boosted.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        boosted.truncate(top_k);

        Ok(boosted)
    }

    /// Drop a project's namespace entirely.
    async fn delete_project(&self, project_id: &str) -> Result<()>;
}

fn keyword_boost(text: &str, keywords: &[String]) -> f32 {
    let haystack = text.to_lowercase();

    let matched = keywords
        .iter()
        .filter(|kw| !kw.is_empty() && haystack.contains(&kw.to_lowercase()))
        .count();

    (matched as f32 * KEYWORD_BOOST).min(KEYWORD_BOOST_CAP)
}
