use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommerceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Resource not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Capacity exceeded for window {window_id}")]
    CapacityExceeded { window_id: String },

    #[error("Insufficient wallet balance: have {balance_cents}, need {amount_cents}")]
    InsufficientBalance {
        balance_cents: i64,
        amount_cents: i64,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CommerceError> for duka_core::error::DukaError {
    fn from(e: CommerceError) -> Self {
        use duka_core::error::DukaError;
        match e {
            CommerceError::NotFound { kind, id } => DukaError::ResourceNotFound {
                kind: format!("{} {}", kind, id),
            },
            CommerceError::CapacityExceeded { window_id } => {
                DukaError::CapacityExceeded(format!("availability window {}", window_id))
            }
            CommerceError::InsufficientBalance { .. } => {
                DukaError::InvalidInput("insufficient wallet balance".to_string())
            }
            CommerceError::InvalidInput(m) => DukaError::InvalidInput(m),
            CommerceError::Conflict(m) => DukaError::Conflict(m),
            CommerceError::Database(e) => DukaError::Database(e.to_string()),
            CommerceError::Serialization(e) => DukaError::Serialization(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
