use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("No handler registered for job kind: {kind}")]
    NoHandler { kind: String },

    #[error("Job body failed: {0}")]
    Body(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
