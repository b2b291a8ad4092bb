use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Customer not found: {id}")]
    CustomerNotFound { id: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Conversation lock timed out: {0}")]
    LockTimeout(#[from] duka_cache::LockTimeout),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<duka_tenancy::TenancyError> for SessionError {
    fn from(e: duka_tenancy::TenancyError) -> Self {
        SessionError::Crypto(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
