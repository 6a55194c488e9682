//! Service layer: the tiers and collaborators behind the coordinator.

pub mod artifacts;
pub mod cache;
pub mod coordinator;
pub mod decay;
pub mod delegation;
pub mod embeddings;
pub mod fingerprint;
pub mod qdrant;
pub mod sweeper;
pub mod vector;

pub use artifacts::{ArtifactService, NewArtifact};
pub use cache::{CacheKey, CacheTier};
pub use coordinator::{ContextRequest, MemoryCoordinator};
pub use delegation::{DelegationTracker, InheritedContext};
pub use embeddings::EmbeddingService;
pub use fingerprint::FingerprintService;
pub use qdrant::QdrantIndex;
pub use sweeper::{RetentionSweeper, StatusObserver, SweepState, SweepSummary, SweeperHandle};
pub use vector::{VectorFilter, VectorHit, VectorIndex, VectorRecord};
