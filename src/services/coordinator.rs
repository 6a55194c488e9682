//! Memory coordinator facade.
//!
//! Single entry point agents use to read and learn. A context read fans
//! out to the record store and the vector tier under a deadline, blends
//! the results, and caches the bundle keyed by the project's content
//! fingerprint. The record store is authoritative: its failure fails the
//! read, while vector, embedding and cache trouble degrade to partial
//! results.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::db::{self, DbPool, SearchHit};
use crate::error::{Error, Result};
use crate::models::{
    new_id, now, AgentMemory, ContextBundle, InvalidationResult, MemoryKind, RankedTask, Task,
};

use super::cache::{CacheKey, CacheTier};
use super::decay::{self, DEFAULT_IMPORTANCE_WEIGHT};
use super::delegation::DelegationTracker;
use super::embeddings::EmbeddingService;
use super::fingerprint::FingerprintService;
use super::sweeper::StatusObserver;
use super::vector::{VectorFilter, VectorHit, VectorIndex, VectorRecord};
use super::vector::{KEY_AGENT_ID, KEY_KIND, KEY_TEXT};

/// Fingerprint recorded when the caller supplies no project path.
const NO_PATH_FINGERPRINT: &str = "none";

/// A request for task-relevant context.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    pub project_id: String,
    /// Focus retrieval on one task.
    pub task_id: Option<String>,
    /// Requesting agent; enables inherited context from its ancestors.
    pub agent_id: Option<String>,
    /// Free-text query. When empty, recent records are returned unranked.
    pub query: Option<String>,
    /// Working-tree path used for fingerprinting.
    pub project_path: Option<PathBuf>,
    /// Overall deadline; the configured default applies when absent.
    pub deadline_ms: Option<u64>,
}

impl ContextRequest {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }
}

struct RecordSection {
    tasks: Vec<RankedTask>,
    conversations: Vec<crate::models::Conversation>,
    memories: Vec<AgentMemory>,
}

/// Facade coordinating the record store, cache tier and vector tier.
#[derive(Clone)]
pub struct MemoryCoordinator {
    pool: DbPool,
    cache: CacheTier,
    vector: Arc<dyn VectorIndex>,
    embeddings: EmbeddingService,
    fingerprints: FingerprintService,
    delegations: DelegationTracker,
    config: CoordinatorConfig,
    observer: Option<Arc<dyn StatusObserver>>,
}

impl MemoryCoordinator {
    pub fn new(
        pool: DbPool,
        cache: CacheTier,
        vector: Arc<dyn VectorIndex>,
        embeddings: EmbeddingService,
        fingerprints: FingerprintService,
        config: CoordinatorConfig,
    ) -> Self {
        let delegations = DelegationTracker::new(pool.clone());
        Self {
            pool,
            cache,
            vector,
            embeddings,
            fingerprints,
            delegations,
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Assemble task-relevant context for an agent under a deadline.
    pub async fn get_context(&self, request: ContextRequest) -> Result<ContextBundle> {
        let started = Instant::now();
        let deadline_ms = request
            .deadline_ms
            .unwrap_or(self.config.default_deadline_ms);

        let fingerprint = self
            .current_fingerprint(request.project_path.as_deref())
            .await;

        // A moved fingerprint silently drops the project's stale entries
        let invalidated = self
            .cache
            .invalidate_if_fingerprint_changed(&request.project_id, &fingerprint)
            .await;
        if invalidated {
            if let Some(observer) = &self.observer {
                observer
                    .on_cache_invalidated(&request.project_id, "fingerprint_changed")
                    .await;
            }
        }

        let key = CacheKey::new(&request.project_id, &fingerprint);
        if let Some(mut bundle) = self.cache.get(&key).await {
            bundle.cache_hit = true;
            bundle.timing_ms = started.elapsed().as_millis() as u64;
            debug!(project_id = %request.project_id, timing_ms = bundle.timing_ms, "Context served from cache");
            return Ok(bundle);
        }

        if let Err(e) = db::touch_project(&self.pool, &request.project_id).await {
            warn!(project_id = %request.project_id, error = %e, "Failed to touch project");
        }

        let query_text = request.query.clone().unwrap_or_default();
        let budget = Duration::from_millis(deadline_ms);

        let record_fut = self.record_section(&request, &query_text);
        let vector_fut = self.vector_section(&request, &query_text, &fingerprint);

        let (record_result, vector_result) =
            tokio::join!(timeout(budget, record_fut), timeout(budget, vector_fut));

        // Record store is authoritative: its timeout or error fails the read
        let record = match record_result {
            Ok(Ok(section)) => section,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::Timeout(deadline_ms)),
        };

        let (vector_hits, partial) = match vector_result {
            Ok(Ok(hits)) => (hits, false),
            Ok(Err(e)) if e.is_degradable() => {
                warn!(project_id = %request.project_id, error = %e, "Vector tier degraded, serving record-store results");
                (Vec::new(), true)
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(project_id = %request.project_id, deadline_ms, "Vector tier missed the deadline");
                (Vec::new(), true)
            }
        };

        let tasks = self.blend_tasks(record.tasks, &vector_hits).await?;

        let bundle = ContextBundle {
            project_id: request.project_id.clone(),
            fingerprint: fingerprint.clone(),
            tasks,
            conversations: record.conversations,
            memories: record.memories,
            timing_ms: started.elapsed().as_millis() as u64,
            cache_hit: false,
            partial,
        };

        // Partial bundles are not cached; the next read retries the
        // degraded tier instead of pinning a degraded answer.
        if !partial {
            self.cache
                .set(&key, bundle.clone(), self.config.cache_ttl)
                .await;
        }

        info!(
            project_id = %request.project_id,
            timing_ms = bundle.timing_ms,
            tasks = bundle.tasks.len(),
            partial = bundle.partial,
            "Context assembled"
        );

        Ok(bundle)
    }

    /// Recompute a project's fingerprint and drop its cache entries when
    /// the underlying content has moved.
    pub async fn invalidate(
        &self,
        project_id: &str,
        project_path: Option<&Path>,
    ) -> Result<InvalidationResult> {
        let fingerprint = self.current_fingerprint(project_path).await;

        let invalidated = self
            .cache
            .invalidate_if_fingerprint_changed(project_id, &fingerprint)
            .await;

        let reason = if invalidated {
            "fingerprint_changed"
        } else {
            "fingerprint_unchanged"
        };

        if invalidated {
            if let Some(observer) = &self.observer {
                observer.on_cache_invalidated(project_id, reason).await;
            }
        }

        Ok(InvalidationResult {
            invalidated,
            reason: reason.to_string(),
        })
    }

    /// Record a learned pattern and index it for similarity retrieval.
    /// The vector write happens off the caller's path; the memory is
    /// durable in the record store before this returns.
    pub async fn record_learning(
        &self,
        project_id: &str,
        agent_id: &str,
        kind: MemoryKind,
        content: &str,
        importance: f64,
    ) -> Result<AgentMemory> {
        let memory = AgentMemory {
            id: new_id(),
            agent_id: agent_id.to_string(),
            project_id: project_id.to_string(),
            kind: kind.as_str().to_string(),
            content: content.to_string(),
            importance,
            created_at: now(),
            last_accessed_at: None,
            access_count: 0,
        };

        db::save_memory(&self.pool, &memory).await?;

        if let Err(e) = db::touch_project(&self.pool, project_id).await {
            warn!(project_id, error = %e, "Failed to touch project");
        }

        // Vector indexing is best-effort and asynchronous
        let vector = Arc::clone(&self.vector);
        let embeddings = self.embeddings.clone();
        let memory_for_index = memory.clone();
        tokio::spawn(async move {
            let embedding = match embeddings.embed_single(&memory_for_index.content).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(memory_id = %memory_for_index.id, error = %e, "Skipping vector indexing for memory");
                    return;
                }
            };

            let record = VectorRecord::new(memory_for_index.id.clone(), embedding)
                .with_metadata(KEY_TEXT, memory_for_index.content.clone())
                .with_metadata(KEY_KIND, "memory")
                .with_metadata(KEY_AGENT_ID, memory_for_index.agent_id.clone());

            if let Err(e) = vector
                .upsert(&memory_for_index.project_id, vec![record])
                .await
            {
                warn!(memory_id = %memory_for_index.id, error = %e, "Vector indexing for memory failed");
            }
        });

        info!(
            memory_id = %memory.id,
            project_id,
            agent_id,
            kind = %memory.kind,
            "Recorded learning"
        );

        Ok(memory)
    }

    /// Index a task for similarity retrieval. Best-effort; the task must
    /// already be durable in the record store.
    pub async fn index_task(&self, task: &Task) -> Result<()> {
        let embedding = self.embeddings.embed_single(&task.description).await?;

        let record = VectorRecord::new(task.id.clone(), embedding)
            .with_metadata(KEY_TEXT, task.description.clone())
            .with_metadata(KEY_KIND, "task");

        self.vector.upsert(&task.project_id, vec![record]).await
    }

    /// Tasks most similar to a description, best first. Falls back to
    /// full-text search when the vector tier is unavailable.
    pub async fn similar_tasks(
        &self,
        project_id: &str,
        description: &str,
        top_k: usize,
    ) -> Result<Vec<RankedTask>> {
        let via_vector = self
            .similar_tasks_by_vector(project_id, description, top_k)
            .await;

        match via_vector {
            Ok(tasks) => Ok(tasks),
            Err(e) if e.is_degradable() => {
                warn!(project_id, error = %e, "Vector tier unavailable, falling back to text search");
                let hits =
                    db::search_records(&self.pool, description, Some(project_id), None, top_k)
                        .await?;
                self.tasks_from_hits(&hits).await
            }
            Err(e) => Err(e),
        }
    }

    async fn similar_tasks_by_vector(
        &self,
        project_id: &str,
        description: &str,
        top_k: usize,
    ) -> Result<Vec<RankedTask>> {
        let embedding = self.embeddings.embed_single(description).await?;
        let keywords = keywords_of(description);

        let hits = self
            .vector
            .hybrid_search(
                project_id,
                embedding,
                &keywords,
                top_k,
                Some(VectorFilter::new().with_kind("task")),
            )
            .await?;

        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        let tasks = db::get_tasks_by_ids(&self.pool, &ids).await?;

        let mut ranked: Vec<RankedTask> = hits
            .into_iter()
            .filter_map(|hit| {
                tasks
                    .iter()
                    .find(|t| t.id == hit.id)
                    .map(|task| RankedTask {
                        task: task.clone(),
                        score: hit.score,
                    })
            })
            .collect();
        ranked.truncate(top_k);

        Ok(ranked)
    }

    async fn current_fingerprint(&self, project_path: Option<&Path>) -> String {
        let Some(path) = project_path else {
            return NO_PATH_FINGERPRINT.to_string();
        };

        match self.fingerprints.fingerprint(path).await {
            Ok(fp) => fp,
            Err(e) => {
                // Unreadable repo state degrades to an unstable marker so
                // nothing stale is served from cache
                warn!(path = %path.display(), error = %e, "Fingerprinting failed, forcing cache miss");
                format!("ts-{}", now().timestamp_millis())
            }
        }
    }

    /// Record-store side of the fan-out: ranked tasks, recent and
    /// inherited conversations, ranked memories.
    async fn record_section(
        &self,
        request: &ContextRequest,
        query_text: &str,
    ) -> Result<RecordSection> {
        let limit = self.config.section_limit;

        let tasks = if query_text.trim().is_empty() {
            db::query_tasks(&self.pool, &request.project_id, None, None, limit as i64)
                .await?
                .into_iter()
                .map(|task| RankedTask { task, score: 0.0 })
                .collect()
        } else {
            let hits = db::search_records(
                &self.pool,
                query_text,
                Some(&request.project_id),
                request.task_id.as_deref(),
                limit,
            )
            .await?;
            self.tasks_from_hits(&hits).await?
        };

        // With a requesting agent, conversations and memories are scoped
        // to that agent plus its ancestor chain; without one, the whole
        // project is visible.
        let agent_scope = request.agent_id.as_deref();

        let mut conversations =
            db::query_conversations(&self.pool, &request.project_id, agent_scope, limit as i64)
                .await?;

        let mut memories = db::query_memories(
            &self.pool,
            &request.project_id,
            None,
            agent_scope,
            limit as i64,
        )
        .await?;

        if let Some(agent_id) = &request.agent_id {
            let inherited = self
                .delegations
                .inherited_context(&request.project_id, agent_id)
                .await?;

            for conversation in inherited.conversations {
                if !conversations.iter().any(|c| c.id == conversation.id) {
                    conversations.push(conversation);
                }
            }
            for memory in inherited.memories {
                if !memories.iter().any(|m| m.id == memory.id) {
                    memories.push(memory);
                }
            }
        }

        memories.sort_by(|a, b| {
            let score_a = memory_rank(a);
            let score_b = memory_rank(b);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        memories.truncate(limit);

        let memory_ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
        if let Err(e) = db::track_memory_access(&self.pool, &memory_ids).await {
            warn!(project_id = %request.project_id, error = %e, "Failed to track memory access");
        }

        Ok(RecordSection {
            tasks,
            conversations,
            memories,
        })
    }

    /// Vector side of the fan-out, cached per query under the current
    /// fingerprint.
    async fn vector_section(
        &self,
        request: &ContextRequest,
        query_text: &str,
        fingerprint: &str,
    ) -> Result<Vec<VectorHit>> {
        if query_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_hash = hash_query(query_text);
        if let Some(hits) = self
            .cache
            .get_vector(&request.project_id, fingerprint, &query_hash)
            .await
        {
            debug!(project_id = %request.project_id, "Vector results served from cache");
            return Ok(hits);
        }

        let embedding = self.embeddings.embed_single(query_text).await?;
        let keywords = keywords_of(query_text);

        let hits = self
            .vector
            .hybrid_search(
                &request.project_id,
                embedding,
                &keywords,
                self.config.section_limit,
                Some(VectorFilter::new().with_kind("task")),
            )
            .await?;

        self.cache
            .set_vector(&request.project_id, fingerprint, &query_hash, hits.clone())
            .await;

        Ok(hits)
    }

    /// Interleave record-store and vector scores for tasks. A task found
    /// by both tiers gets a weighted blend; a task found by only one
    /// keeps that tier's score scaled by its weight.
    async fn blend_tasks(
        &self,
        record_tasks: Vec<RankedTask>,
        vector_hits: &[VectorHit],
    ) -> Result<Vec<RankedTask>> {
        let weight = self.config.vector_weight as f32;
        let mut blended: Vec<RankedTask> = Vec::new();

        for ranked in record_tasks {
            let vector_score = vector_hits
                .iter()
                .find(|h| h.id == ranked.task.id)
                .map(|h| h.score)
                .unwrap_or(0.0);

            blended.push(RankedTask {
                score: (1.0 - weight) * ranked.score + weight * vector_score,
                task: ranked.task,
            });
        }

        // Tasks only the vector tier surfaced
        let missing_ids: Vec<String> = vector_hits
            .iter()
            .filter(|h| !blended.iter().any(|r| r.task.id == h.id))
            .map(|h| h.id.clone())
            .collect();

        if !missing_ids.is_empty() {
            let tasks = db::get_tasks_by_ids(&self.pool, &missing_ids).await?;
            for task in tasks {
                let vector_score = vector_hits
                    .iter()
                    .find(|h| h.id == task.id)
                    .map(|h| h.score)
                    .unwrap_or(0.0);
                blended.push(RankedTask {
                    task,
                    score: weight * vector_score,
                });
            }
        }

        blended.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.task.id.cmp(&b.task.id))
        });
        blended.truncate(self.config.section_limit);

        Ok(blended)
    }

    async fn tasks_from_hits(&self, hits: &[SearchHit]) -> Result<Vec<RankedTask>> {
        let task_ids: Vec<String> = hits
            .iter()
            .filter(|h| h.entity_kind == "task")
            .map(|h| h.entity_id.clone())
            .collect();

        let tasks = db::get_tasks_by_ids(&self.pool, &task_ids).await?;

        Ok(hits
            .iter()
            .filter(|h| h.entity_kind == "task")
            .filter_map(|hit| {
                tasks
                    .iter()
                    .find(|t| t.id == hit.entity_id)
                    .map(|task| RankedTask {
                        task: task.clone(),
                        score: hit.score,
                    })
            })
            .collect())
    }
}

fn memory_rank(memory: &AgentMemory) -> f64 {
    let strength = decay::calculate_strength(
        memory.created_at,
        memory.last_accessed_at,
        memory.access_count,
        decay::DEFAULT_HALF_LIFE_DAYS,
    );
    decay::rank_score(memory.importance, strength, DEFAULT_IMPORTANCE_WEIGHT)
}

fn keywords_of(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

fn hash_query(text: &str) -> String {
    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::db::{init_pool, initialize_schema, save_task};
    use crate::error::Error;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// In-memory vector index with cosine similarity.
    struct StubVectorIndex {
        points: Mutex<HashMap<String, Vec<VectorRecord>>>,
    }

    impl StubVectorIndex {
        fn new() -> Self {
            Self {
                points: Mutex::new(HashMap::new()),
            }
        }
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            dot / (na * nb)
        }
    }

    #[async_trait]
    impl VectorIndex for StubVectorIndex {
        async fn upsert(&self, project_id: &str, records: Vec<VectorRecord>) -> Result<()> {
            let mut points = self.points.lock().await;
            let entry = points.entry(project_id.to_string()).or_default();
            for record in records {
                entry.retain(|r| r.id != record.id);
                entry.push(record);
            }
            Ok(())
        }

        async fn search(
            &self,
            project_id: &str,
            embedding: Vec<f32>,
            top_k: usize,
            filter: Option<VectorFilter>,
        ) -> Result<Vec<VectorHit>> {
            let points = self.points.lock().await;
            let mut hits: Vec<VectorHit> = points
                .get(project_id)
                .map(|records| {
                    records
                        .iter()
                        .filter(|r| match &filter {
                            Some(f) => match &f.kind {
                                Some(kind) => {
                                    r.metadata.get(KEY_KIND).and_then(|v| v.as_str())
                                        == Some(kind.as_str())
                                }
                                None => true,
                            },
                            None => true,
                        })
                        .map(|r| VectorHit {
                            id: r.id.clone(),
                            score: cosine(&r.embedding, &embedding),
                            metadata: r.metadata.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            hits.truncate(top_k);
            Ok(hits)
        }

        async fn delete_project(&self, project_id: &str) -> Result<()> {
            self.points.lock().await.remove(project_id);
            Ok(())
        }
    }

    /// Vector index that sleeps past any sensible deadline.
    struct SlowVectorIndex;

    #[async_trait]
    impl VectorIndex for SlowVectorIndex {
        async fn upsert(&self, _project_id: &str, _records: Vec<VectorRecord>) -> Result<()> {
            Ok(())
        }

        async fn search(
            &self,
            _project_id: &str,
            _embedding: Vec<f32>,
            _top_k: usize,
            _filter: Option<VectorFilter>,
        ) -> Result<Vec<VectorHit>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn delete_project(&self, _project_id: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Vector index that always fails.
    struct FailingVectorIndex;

    #[async_trait]
    impl VectorIndex for FailingVectorIndex {
        async fn upsert(&self, _project_id: &str, _records: Vec<VectorRecord>) -> Result<()> {
            Err(Error::VectorStore("backend down".to_string()))
        }

        async fn search(
            &self,
            _project_id: &str,
            _embedding: Vec<f32>,
            _top_k: usize,
            _filter: Option<VectorFilter>,
        ) -> Result<Vec<VectorHit>> {
            Err(Error::VectorStore("backend down".to_string()))
        }

        async fn delete_project(&self, _project_id: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn coordinator_with(vector: Arc<dyn VectorIndex>) -> MemoryCoordinator {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let embeddings = EmbeddingService::new(EmbeddingConfig {
            base_url: String::new(),
            model: "test".to_string(),
            api_key: None,
            dimension: 64,
        })
        .unwrap();

        MemoryCoordinator::new(
            pool,
            CacheTier::with_defaults(),
            vector,
            embeddings,
            FingerprintService::new(),
            CoordinatorConfig::default(),
        )
    }

    fn task(id: &str, description: &str) -> Task {
        Task {
            id: id.to_string(),
            project_id: "proj-1".to_string(),
            description: description.to_string(),
            status: "pending".to_string(),
            assignee_id: None,
            created_at: now(),
        }
    }

    #[tokio::test]
    async fn test_get_context_ranks_matching_task() {
        let coordinator = coordinator_with(Arc::new(StubVectorIndex::new())).await;

        let oauth = task("task-1", "Implement OAuth2 authentication flow");
        let other = task("task-2", "Adjust build pipeline caching");
        save_task(&coordinator.pool, &oauth).await.unwrap();
        save_task(&coordinator.pool, &other).await.unwrap();
        coordinator.index_task(&oauth).await.unwrap();
        coordinator.index_task(&other).await.unwrap();

        let mut request = ContextRequest::new("proj-1");
        request.query = Some("OAuth2 authentication".to_string());

        let bundle = coordinator.get_context(request).await.unwrap();
        assert!(!bundle.partial);
        assert!(!bundle.cache_hit);
        assert!(!bundle.tasks.is_empty());
        assert_eq!(bundle.tasks[0].task.id, "task-1");
    }

    #[tokio::test]
    async fn test_second_read_hits_cache() {
        let coordinator = coordinator_with(Arc::new(StubVectorIndex::new())).await;
        save_task(&coordinator.pool, &task("task-1", "Implement retries"))
            .await
            .unwrap();

        let request = ContextRequest::new("proj-1");
        let first = coordinator.get_context(request.clone()).await.unwrap();
        assert!(!first.cache_hit);

        let second = coordinator.get_context(request).await.unwrap();
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn test_vector_timeout_degrades_to_partial() {
        let coordinator = coordinator_with(Arc::new(SlowVectorIndex)).await;
        save_task(
            &coordinator.pool,
            &task("task-1", "Implement OAuth2 authentication flow"),
        )
        .await
        .unwrap();

        let mut request = ContextRequest::new("proj-1");
        request.query = Some("OAuth2".to_string());
        request.deadline_ms = Some(150);

        let bundle = coordinator.get_context(request).await.unwrap();
        assert!(bundle.partial);
        assert_eq!(bundle.tasks.len(), 1);
        assert!(bundle.timing_ms < 5_000);
    }

    #[tokio::test]
    async fn test_vector_error_degrades_to_partial() {
        let coordinator = coordinator_with(Arc::new(FailingVectorIndex)).await;
        save_task(
            &coordinator.pool,
            &task("task-1", "Implement OAuth2 authentication flow"),
        )
        .await
        .unwrap();

        let mut request = ContextRequest::new("proj-1");
        request.query = Some("OAuth2".to_string());

        let bundle = coordinator.get_context(request).await.unwrap();
        assert!(bundle.partial);
        assert_eq!(bundle.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_bundle_not_cached() {
        let coordinator = coordinator_with(Arc::new(FailingVectorIndex)).await;
        save_task(&coordinator.pool, &task("task-1", "Implement retries"))
            .await
            .unwrap();

        let mut request = ContextRequest::new("proj-1");
        request.query = Some("retries".to_string());

        let first = coordinator.get_context(request.clone()).await.unwrap();
        assert!(first.partial);

        let second = coordinator.get_context(request).await.unwrap();
        assert!(!second.cache_hit);
    }

    #[tokio::test]
    async fn test_invalidate_without_path_leaves_cache_intact() {
        let coordinator = coordinator_with(Arc::new(StubVectorIndex::new())).await;
        save_task(&coordinator.pool, &task("task-1", "Implement retries"))
            .await
            .unwrap();

        // Populate the cache under the "none" fingerprint
        coordinator
            .get_context(ContextRequest::new("proj-1"))
            .await
            .unwrap();

        let unchanged = coordinator.invalidate("proj-1", None).await.unwrap();
        assert!(!unchanged.invalidated);
        assert_eq!(unchanged.reason, "fingerprint_unchanged");

        let bundle = coordinator
            .get_context(ContextRequest::new("proj-1"))
            .await
            .unwrap();
        assert!(bundle.cache_hit);
    }

    fn commit_all(repo: &git2::Repository, message: &str) -> git2::Oid {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalidate_recomputes_fingerprint_from_path() {
        let coordinator = coordinator_with(Arc::new(StubVectorIndex::new())).await;
        save_task(&coordinator.pool, &task("task-1", "Implement retries"))
            .await
            .unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        commit_all(&repo, "first");

        let mut request = ContextRequest::new("proj-1");
        request.project_path = Some(dir.path().to_path_buf());
        coordinator.get_context(request).await.unwrap();

        // Same revision: cache left intact
        let unchanged = coordinator
            .invalidate("proj-1", Some(dir.path()))
            .await
            .unwrap();
        assert!(!unchanged.invalidated);

        std::fs::write(dir.path().join("a.txt"), "two").unwrap();
        commit_all(&repo, "second");

        let changed = coordinator
            .invalidate("proj-1", Some(dir.path()))
            .await
            .unwrap();
        assert!(changed.invalidated);
        assert_eq!(changed.reason, "fingerprint_changed");
    }

    #[tokio::test]
    async fn test_record_learning_persists_memory() {
        let coordinator = coordinator_with(Arc::new(StubVectorIndex::new())).await;

        let memory = coordinator
            .record_learning(
                "proj-1",
                "worker-1",
                MemoryKind::SuccessPattern,
                "Batch the upserts",
                0.8,
            )
            .await
            .unwrap();

        let fetched = db::get_memory(&coordinator.pool, &memory.id).await.unwrap();
        assert_eq!(fetched.content, "Batch the upserts");
        assert_eq!(fetched.importance, 0.8);
    }

    #[tokio::test]
    async fn test_record_learning_rejects_bad_importance() {
        let coordinator = coordinator_with(Arc::new(StubVectorIndex::new())).await;
        let result = coordinator
            .record_learning(
                "proj-1",
                "worker-1",
                MemoryKind::ContextNote,
                "too important",
                1.5,
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_similar_tasks_vector_path() {
        let coordinator = coordinator_with(Arc::new(StubVectorIndex::new())).await;

        let a = task("task-1", "Implement OAuth2 authentication flow");
        let b = task("task-2", "Tune the retention sweeper interval");
        save_task(&coordinator.pool, &a).await.unwrap();
        save_task(&coordinator.pool, &b).await.unwrap();
        coordinator.index_task(&a).await.unwrap();
        coordinator.index_task(&b).await.unwrap();

        let similar = coordinator
            .similar_tasks("proj-1", "Implement OAuth2 authentication flow", 2)
            .await
            .unwrap();
        assert_eq!(similar[0].task.id, "task-1");
    }

    #[tokio::test]
    async fn test_similar_tasks_falls_back_to_text_search() {
        let coordinator = coordinator_with(Arc::new(FailingVectorIndex)).await;
        save_task(
            &coordinator.pool,
            &task("task-1", "Implement OAuth2 authentication flow"),
        )
        .await
        .unwrap();

        let similar = coordinator
            .similar_tasks("proj-1", "OAuth2 authentication", 5)
            .await
            .unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].task.id, "task-1");
    }

    #[tokio::test]
    async fn test_inherited_memories_visible_to_sub_agent() {
        let coordinator = coordinator_with(Arc::new(StubVectorIndex::new())).await;

        coordinator
            .delegations
            .record_delegation("proj-1", "orchestrator", "worker-1")
            .await
            .unwrap();
        coordinator
            .record_learning(
                "proj-1",
                "orchestrator",
                MemoryKind::SuccessPattern,
                "Always pin the schema version",
                0.9,
            )
            .await
            .unwrap();

        let mut request = ContextRequest::new("proj-1");
        request.agent_id = Some("worker-1".to_string());

        let bundle = coordinator.get_context(request).await.unwrap();
        assert!(bundle
            .memories
            .iter()
            .any(|m| m.content == "Always pin the schema version"));
    }
}
