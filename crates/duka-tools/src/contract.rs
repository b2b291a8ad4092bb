use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::warn;

/// Mandatory envelope on every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tenant_id: String,
    pub request_id: String,
    pub conversation_id: String,
}

impl ToolContext {
    pub fn new(tenant_id: &str, request_id: &str, conversation_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            request_id: request_id.to_string(),
            conversation_id: conversation_id.to_string(),
        }
    }
}

/// Tool failure taxonomy. Callers retry `Retryable` up to the schedule below;
/// `Permanent` either escalates or becomes a customer-visible apology.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("retryable tool error: {0}")]
    Retryable(String),

    #[error("permanent tool error: {0}")]
    Permanent(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Retryable(_))
    }

    /// Classify a storage error: lock contention is transient, everything
    /// else is permanent.
    pub fn from_sqlite(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(f, _)
                if matches!(
                    f.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                ToolError::Retryable(e.to_string())
            }
            _ => ToolError::Permanent(e.to_string()),
        }
    }
}

impl From<duka_commerce::CommerceError> for ToolError {
    fn from(e: duka_commerce::CommerceError) -> Self {
        use duka_commerce::CommerceError;
        match e {
            CommerceError::NotFound { kind, id } => {
                ToolError::NotFound(format!("{} {}", kind, id))
            }
            CommerceError::Database(inner) => ToolError::from_sqlite(inner),
            other => ToolError::Permanent(other.to_string()),
        }
    }
}

impl From<duka_sessions::SessionError> for ToolError {
    fn from(e: duka_sessions::SessionError) -> Self {
        match e {
            duka_sessions::SessionError::Database(inner) => ToolError::from_sqlite(inner),
            other => ToolError::Permanent(other.to_string()),
        }
    }
}

impl From<duka_tenancy::TenancyError> for ToolError {
    fn from(e: duka_tenancy::TenancyError) -> Self {
        match e {
            duka_tenancy::TenancyError::TenantNotFound => {
                ToolError::NotFound("tenant".to_string())
            }
            duka_tenancy::TenancyError::Database(inner) => ToolError::from_sqlite(inner),
            other => ToolError::Permanent(other.to_string()),
        }
    }
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Retry schedule for transient tool failures: 1s, 5s, 15s.
const BACKOFF_SECS: [u64; 3] = [1, 5, 15];
const JITTER_MS_MAX: u64 = 500;

/// Run `op` with up to three retries on `Retryable` errors, sleeping the
/// backoff schedule plus jitter between attempts. Permanent errors and
/// `NotFound` return immediately.
pub async fn with_retry<T, F, Fut>(label: &str, mut op: F) -> ToolResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ToolResult<T>>,
{
    for (attempt, base_secs) in BACKOFF_SECS.iter().enumerate() {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                warn!(tool = label, attempt, err = %e, "retryable tool failure");
                let jitter = rand::thread_rng().gen_range(0..JITTER_MS_MAX);
                tokio::time::sleep(Duration::from_millis(base_secs * 1000 + jitter)).await;
            }
            Err(e) => return Err(e),
        }
    }
    // Final attempt after the last sleep.
    match op().await {
        Ok(v) => Ok(v),
        Err(e) => {
            warn!(tool = label, "tool failed after retries");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_are_retried_then_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = with_retry("test", move || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ToolError::Retryable("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_fail_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: ToolResult<u32> = with_retry("test", move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ToolError::Permanent("broken".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(ToolError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let result: ToolResult<u32> =
            with_retry("test", || async { Err(ToolError::Retryable("down".into())) }).await;
        assert!(matches!(result, Err(ToolError::Retryable(_))));
    }
}
