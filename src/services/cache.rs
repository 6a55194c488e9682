//! Fingerprint-keyed cache tier.
//!
//! Sits in front of the record and vector tiers. Entries are keyed by
//! `{project_id}:{fingerprint}` and expire either by TTL (default 30 days)
//! or when the project's fingerprint moves on, whichever happens first.
//! Cache trouble is never allowed to fail a read; every accessor returns
//! a miss instead of an error.

use std::time::{Duration, Instant};

use moka::future::Cache;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::DEFAULT_CACHE_TTL_DAYS;
use crate::models::ContextBundle;

use super::vector::VectorHit;

/// Cache key: a project id paired with the fingerprint current when the
/// entry was produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub project_id: String,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(project_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.project_id, self.fingerprint)
    }
}

#[derive(Clone)]
struct BundleEntry {
    fingerprint: String,
    bundle: ContextBundle,
    expires_at: Instant,
}

#[derive(Clone)]
struct VectorEntry {
    fingerprint: String,
    hits: Vec<VectorHit>,
    expires_at: Instant,
}

/// Fast-path cache over assembled context bundles and vector sub-query
/// results.
#[derive(Clone)]
pub struct CacheTier {
    /// One bundle per project; the stored fingerprint decides validity.
    bundles: Cache<String, BundleEntry>,
    /// Vector sub-query results keyed by `{project_id}:{query_hash}`.
    vectors: Cache<String, VectorEntry>,
    default_ttl: Duration,
}

impl CacheTier {
    pub fn new(max_entries: u64, default_ttl: Duration) -> Self {
        let bundles = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(default_ttl)
            .support_invalidation_closures()
            .build();

        let vectors = Cache::builder()
            .max_capacity(max_entries * 4)
            .time_to_live(default_ttl)
            .support_invalidation_closures()
            .build();

        Self {
            bundles,
            vectors,
            default_ttl,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            10_000,
            Duration::from_secs(DEFAULT_CACHE_TTL_DAYS * 86400),
        )
    }

    /// Get the cached bundle for a key. Misses on absent entry, stale
    /// fingerprint, or per-entry TTL expiry.
    pub async fn get(&self, key: &CacheKey) -> Option<ContextBundle> {
        let entry = self.bundles.get(&key.project_id).await?;

        if entry.fingerprint != key.fingerprint {
            return None;
        }
        if entry.expires_at <= Instant::now() {
            self.bundles.invalidate(&key.project_id).await;
            return None;
        }

        Some(entry.bundle)
    }

    /// Store a bundle with an explicit TTL.
    pub async fn set(&self, key: &CacheKey, bundle: ContextBundle, ttl: Duration) {
        let entry = BundleEntry {
            fingerprint: key.fingerprint.clone(),
            bundle,
            expires_at: Instant::now() + ttl.min(self.default_ttl),
        };
        self.bundles.insert(key.project_id.clone(), entry).await;
    }

    /// Store a bundle with the default TTL.
    pub async fn set_default(&self, key: &CacheKey, bundle: ContextBundle) {
        self.set(key, bundle, self.default_ttl).await;
    }

    /// Batch lookup; the returned map only contains hits.
    pub async fn get_batch(&self, keys: &[CacheKey]) -> HashMap<CacheKey, ContextBundle> {
        let lookups = keys.iter().map(|key| async move {
            self.get(key).await.map(|bundle| (key.clone(), bundle))
        });

        futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Compare the stored fingerprint against the current one. On mismatch
    /// the project's bundle and vector entries are dropped and `true` is
    /// returned; on match (or nothing cached) the cache is left intact.
    pub async fn invalidate_if_fingerprint_changed(
        &self,
        project_id: &str,
        current_fingerprint: &str,
    ) -> bool {
        let stale = match self.bundles.get(project_id).await {
            Some(entry) => entry.fingerprint != current_fingerprint,
            None => false,
        };

        if stale {
            info!(project_id, fingerprint = current_fingerprint, "Fingerprint changed, invalidating cache");
            self.invalidate_project(project_id).await;
        } else {
            debug!(project_id, "Fingerprint unchanged, cache intact");
        }

        stale
    }

    /// Drop all entries for a project.
    pub async fn invalidate_project(&self, project_id: &str) {
        self.bundles.invalidate(project_id).await;

        let prefix = format!("{}:", project_id);
        // Predicate invalidation runs lazily inside moka; entries are
        // unreachable immediately after this call returns.
        let _ = self
            .vectors
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix));
    }

    /// Cached vector sub-query results for a query under a fingerprint.
    pub async fn get_vector(
        &self,
        project_id: &str,
        fingerprint: &str,
        query_hash: &str,
    ) -> Option<Vec<VectorHit>> {
        let key = format!("{}:{}", project_id, query_hash);
        let entry = self.vectors.get(&key).await?;

        if entry.fingerprint != fingerprint || entry.expires_at <= Instant::now() {
            return None;
        }

        Some(entry.hits)
    }

    pub async fn set_vector(
        &self,
        project_id: &str,
        fingerprint: &str,
        query_hash: &str,
        hits: Vec<VectorHit>,
    ) {
        let key = format!("{}:{}", project_id, query_hash);
        let entry = VectorEntry {
            fingerprint: fingerprint.to_string(),
            hits,
            expires_at: Instant::now() + self.default_ttl,
        };
        self.vectors.insert(key, entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(project_id: &str, fingerprint: &str) -> ContextBundle {
        ContextBundle {
            project_id: project_id.to_string(),
            fingerprint: fingerprint.to_string(),
            tasks: Vec::new(),
            conversations: Vec::new(),
            memories: Vec::new(),
            timing_ms: 1,
            cache_hit: false,
            partial: false,
        }
    }

    #[tokio::test]
    async fn test_get_set_round_trip() {
        let cache = CacheTier::with_defaults();
        let key = CacheKey::new("proj-1", "rev-a");

        assert!(cache.get(&key).await.is_none());

        cache.set_default(&key, bundle("proj-1", "rev-a")).await;
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_stale_fingerprint_misses() {
        let cache = CacheTier::with_defaults();
        cache
            .set_default(&CacheKey::new("proj-1", "rev-a"), bundle("proj-1", "rev-a"))
            .await;

        assert!(cache.get(&CacheKey::new("proj-1", "rev-b")).await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = CacheTier::new(100, Duration::from_secs(3600));
        let key = CacheKey::new("proj-1", "rev-a");
        cache
            .set(&key, bundle("proj-1", "rev-a"), Duration::from_millis(10))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidation_on_fingerprint_change() {
        let cache = CacheTier::with_defaults();
        cache
            .set_default(&CacheKey::new("proj-1", "rev-a"), bundle("proj-1", "rev-a"))
            .await;

        // Same fingerprint: intact
        assert!(!cache.invalidate_if_fingerprint_changed("proj-1", "rev-a").await);
        assert!(cache.get(&CacheKey::new("proj-1", "rev-a")).await.is_some());

        // New fingerprint: dropped
        assert!(cache.invalidate_if_fingerprint_changed("proj-1", "rev-b").await);
        assert!(cache.get(&CacheKey::new("proj-1", "rev-a")).await.is_none());

        // Nothing cached: not an invalidation
        assert!(!cache.invalidate_if_fingerprint_changed("proj-1", "rev-b").await);
    }

    #[tokio::test]
    async fn test_get_batch_returns_only_hits() {
        let cache = CacheTier::with_defaults();
        let hit = CacheKey::new("proj-1", "rev-a");
        let miss = CacheKey::new("proj-2", "rev-z");
        cache.set_default(&hit, bundle("proj-1", "rev-a")).await;

        let found = cache.get_batch(&[hit.clone(), miss]).await;
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&hit));
    }
}
