//! Recall - Layered Context Store for Multi-Agent Orchestration
//!
//! A shared memory substrate for agent teams: a SQLite record store with
//! full-text search, a fingerprint-keyed cache tier, a Qdrant-backed
//! vector tier, artifact references, delegation tracking and retention,
//! all behind the [`MemoryCoordinator`] facade.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{Error, Result};
pub use services::{ContextRequest, MemoryCoordinator};

/// Initialize tracing from `RUST_LOG` for binaries and tests. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
