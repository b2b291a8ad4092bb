use thiserror::Error;

/// Top-level error for every Duka subsystem.
///
/// Variants map 1:1 to the wire codes in the operator API error envelope.
/// Customer-facing paths never surface these directly — the journey layer
/// renders a tenant-branded apology instead.
#[derive(Debug, Error)]
pub enum DukaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Webhook signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("Insufficient permissions: missing {missing}")]
    InsufficientPermissions { missing: String },

    #[error("Four-eyes violation: initiator and approver must differ")]
    FourEyesViolation { initiator: String, approver: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Subscription inactive for tenant {tenant_id}")]
    SubscriptionInactive { tenant_id: String },

    #[error("Feature limit exceeded: {feature}")]
    FeatureLimitExceeded { feature: String },

    #[error("Daily message limit reached for tenant {tenant_id}")]
    DailyMessageLimit { tenant_id: String },

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Tenant not found")]
    TenantNotFound,

    #[error("Resource not found: {kind}")]
    ResourceNotFound { kind: String },

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External API error ({service}): {reason}")]
    ExternalApi {
        service: String,
        reason: String,
        retryable: bool,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DukaError {
    /// Short error code string used in the API error envelope and logs.
    pub fn code(&self) -> &'static str {
        match self {
            DukaError::Config(_) => "CONFIG_ERROR",
            DukaError::InvalidApiKey => "INVALID_API_KEY",
            DukaError::InvalidSignature(_) => "INVALID_SIGNATURE",
            DukaError::InsufficientPermissions { .. } => "INSUFFICIENT_PERMISSIONS",
            DukaError::FourEyesViolation { .. } => "FOUR_EYES_VIOLATION",
            DukaError::InvalidInput(_) => "INVALID_INPUT",
            DukaError::SubscriptionInactive { .. } => "SUBSCRIPTION_INACTIVE",
            DukaError::FeatureLimitExceeded { .. } => "FEATURE_LIMIT_EXCEEDED",
            DukaError::DailyMessageLimit { .. } => "DAILY_MESSAGE_LIMIT",
            DukaError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            DukaError::TenantNotFound => "TENANT_NOT_FOUND",
            DukaError::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            DukaError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            DukaError::Conflict(_) => "CONFLICT",
            DukaError::ExternalApi { .. } => "EXTERNAL_API_ERROR",
            DukaError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            DukaError::Database(_) => "INTERNAL_ERROR",
            DukaError::Serialization(_) => "INTERNAL_ERROR",
            DukaError::Io(_) => "INTERNAL_ERROR",
            DukaError::Timeout { .. } => "EXTERNAL_API_ERROR",
            DukaError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for the operator API surface.
    pub fn http_status(&self) -> u16 {
        match self {
            DukaError::InvalidApiKey | DukaError::InvalidSignature(_) => 401,
            DukaError::InsufficientPermissions { .. } => 403,
            DukaError::FourEyesViolation { .. } | DukaError::Conflict(_) => 409,
            DukaError::InvalidInput(_) => 400,
            DukaError::SubscriptionInactive { .. }
            | DukaError::FeatureLimitExceeded { .. }
            | DukaError::DailyMessageLimit { .. } => 402,
            DukaError::RateLimitExceeded { .. } => 429,
            DukaError::TenantNotFound | DukaError::ResourceNotFound { .. } => 404,
            DukaError::CapacityExceeded(_) => 409,
            DukaError::ExternalApi { .. } | DukaError::ServiceUnavailable(_) => 503,
            DukaError::Timeout { .. } => 504,
            _ => 500,
        }
    }

    /// Whether a caller may retry the failed operation.
    ///
    /// Auth, validation, and tenant-state errors are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            DukaError::ExternalApi { retryable, .. } => *retryable,
            DukaError::Timeout { .. } | DukaError::ServiceUnavailable(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DukaError>;
