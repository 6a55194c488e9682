//! Error types for Recall.
//!
//! Uses thiserror for ergonomic error definitions. The coordinator relies
//! on this taxonomy to decide which failures degrade a response and which
//! are fatal to the call.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Resource errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // External service errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Version control error: {0}")]
    VersionControl(String),

    // Deadline exceeded before a sub-query completed
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this failure may be absorbed by the coordinator as a
    /// partial result instead of failing the whole call.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::VectorStore(_) | Self::Cache(_) | Self::Embedding(_) | Self::Timeout(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::Conflict(_) => "CONFLICT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::VectorStore(_) => "VECTOR_STORE_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Embedding(_) => "EMBEDDING_ERROR",
            Self::VersionControl(_) => "VERSION_CONTROL_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "UNKNOWN_ERROR",
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Embedding(format!("HTTP request failed: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON parsing error: {}", err))
    }
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        Self::VersionControl(err.to_string())
    }
}
