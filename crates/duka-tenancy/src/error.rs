use thiserror::Error;

#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Tenant not found")]
    TenantNotFound,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Membership not found or not accepted for user {user_id}")]
    MembershipInvalid { user_id: String },

    #[error("Insufficient permissions: missing {missing}")]
    MissingScopes { missing: String },

    #[error("Four-eyes violation: {initiator} attempted to approve their own action")]
    FourEyes { initiator: String, approver: String },

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<TenancyError> for duka_core::error::DukaError {
    fn from(e: TenancyError) -> Self {
        use duka_core::error::DukaError;
        match e {
            TenancyError::TenantNotFound => DukaError::TenantNotFound,
            TenancyError::UserNotFound(id) => DukaError::ResourceNotFound {
                kind: format!("user {}", id),
            },
            TenancyError::MembershipInvalid { .. } => DukaError::InsufficientPermissions {
                missing: "tenant membership".to_string(),
            },
            TenancyError::MissingScopes { missing } => {
                DukaError::InsufficientPermissions { missing }
            }
            TenancyError::FourEyes {
                initiator,
                approver,
            } => DukaError::FourEyesViolation {
                initiator,
                approver,
            },
            TenancyError::InvalidInput(m) => DukaError::InvalidInput(m),
            TenancyError::Conflict(m) => DukaError::Conflict(m),
            TenancyError::Database(e) => DukaError::Database(e.to_string()),
            TenancyError::Crypto(m) => DukaError::Internal(m),
            TenancyError::Serialization(e) => DukaError::Serialization(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, TenancyError>;
