use thiserror::Error;

/// Errors from repository operations (used by trait definitions in orchestra-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage backend unavailable")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
