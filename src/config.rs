//! Configuration management for Recall.
//!
//! Loads configuration from environment variables (with `.env` support via
//! dotenvy). There is no global configuration singleton: `Config::from_env`
//! returns a value that callers pass into constructors, so a single process
//! can host multiple isolated coordinator instances with different settings.

use std::env;
use std::time::Duration;

/// Default retention window in days.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Default interval between scheduled retention sweeps.
pub const DEFAULT_SWEEP_INTERVAL_HOURS: u64 = 24;

/// Default cache entry TTL, independent of fingerprint invalidation.
pub const DEFAULT_CACHE_TTL_DAYS: u64 = 30;

/// Default deadline for `get_context` when the caller passes none.
pub const DEFAULT_DEADLINE_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub qdrant: QdrantConfig,
    pub embedding: EmbeddingConfig,
    pub retention: RetentionConfig,
    pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite database path, or ":memory:" for tests.
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub collection_prefix: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible base URL. Empty means no provider is configured
    /// and deterministic fallback vectors are used instead.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimension: usize,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention_days: i64,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline applied when the caller does not supply one.
    pub default_deadline_ms: u64,
    /// Weight of vector-tier similarity when interleaving with
    /// record-store relevance, in [0, 1].
    pub vector_weight: f64,
    /// Cache entry TTL.
    pub cache_ttl: Duration,
    /// Maximum results returned per context section.
    pub section_limit: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: DEFAULT_DEADLINE_MS,
            vector_weight: 0.5,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_DAYS * 86400),
            section_limit: 10,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_HOURS * 3600),
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Self {
        // Load .env if present; ignore errors (production uses real env vars)
        let _ = dotenvy::dotenv();

        Self {
            database: DatabaseConfig {
                path: env_or("RECALL_DATABASE_PATH", "data/recall.db"),
            },
            qdrant: QdrantConfig {
                url: env_or("QDRANT_URL", "http://localhost:6334"),
                collection_prefix: env_or("QDRANT_COLLECTION_PREFIX", "recall_"),
            },
            embedding: EmbeddingConfig {
                base_url: env_or("EMBEDDING_BASE_URL", ""),
                model: env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
                api_key: env::var("EMBEDDING_API_KEY").ok(),
                dimension: env_or("EMBEDDING_DIMENSION", "384")
                    .parse()
                    .unwrap_or(384),
            },
            retention: RetentionConfig {
                retention_days: env_or("RECALL_RETENTION_DAYS", "30")
                    .parse()
                    .unwrap_or(DEFAULT_RETENTION_DAYS),
                sweep_interval: Duration::from_secs(
                    env_or("RECALL_SWEEP_INTERVAL_HOURS", "24")
                        .parse::<u64>()
                        .unwrap_or(DEFAULT_SWEEP_INTERVAL_HOURS)
                        * 3600,
                ),
            },
            coordinator: CoordinatorConfig {
                default_deadline_ms: env_or("RECALL_DEADLINE_MS", "200")
                    .parse()
                    .unwrap_or(DEFAULT_DEADLINE_MS),
                vector_weight: env_or("RECALL_VECTOR_WEIGHT", "0.5")
                    .parse::<f64>()
                    .map(|w| w.clamp(0.0, 1.0))
                    .unwrap_or(0.5),
                cache_ttl: Duration::from_secs(
                    env_or("RECALL_CACHE_TTL_DAYS", "30")
                        .parse::<u64>()
                        .unwrap_or(DEFAULT_CACHE_TTL_DAYS)
                        * 86400,
                ),
                section_limit: env_or("RECALL_SECTION_LIMIT", "10").parse().unwrap_or(10),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
