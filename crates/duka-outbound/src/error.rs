use chrono::{DateTime, Utc};
use thiserror::Error;

use duka_core::types::ConsentCategory;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Sending without consent is a hard error, never a silent skip.
    #[error("customer has not consented to {category:?} messages")]
    ConsentDenied { category: ConsentCategory },

    /// Quiet hours or the daily ceiling pushed this send to a later instant.
    #[error("delivery deferred until {until}")]
    Deferred { until: DateTime<Utc> },

    /// The gateway rejected the send after retries.
    #[error("delivery failed: {reason}")]
    Failed { reason: String },

    #[error("gateway credentials unavailable: {0}")]
    Credentials(String),
}

impl From<DeliveryError> for duka_core::error::DukaError {
    fn from(e: DeliveryError) -> Self {
        use duka_core::error::DukaError;
        match e {
            DeliveryError::ConsentDenied { .. } => {
                DukaError::InvalidInput("consent missing for message category".to_string())
            }
            DeliveryError::Deferred { .. } => DukaError::RateLimitExceeded {
                retry_after_secs: 0,
            },
            DeliveryError::Failed { reason } => DukaError::ExternalApi {
                service: "gateway".to_string(),
                reason,
                retryable: false,
            },
            DeliveryError::Credentials(m) => DukaError::Internal(m),
        }
    }
}
