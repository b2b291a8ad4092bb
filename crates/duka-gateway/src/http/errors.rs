use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use duka_core::error::DukaError;

/// Standard error envelope: `{"error":{"code","message","details"}}`.
/// Rate-limit responses also carry `Retry-After`.
pub struct ApiError(pub DukaError);

impl From<DukaError> for ApiError {
    fn from(e: DukaError) -> Self {
        ApiError(e)
    }
}

impl From<duka_tenancy::TenancyError> for ApiError {
    fn from(e: duka_tenancy::TenancyError) -> Self {
        ApiError(e.into())
    }
}

impl From<duka_commerce::CommerceError> for ApiError {
    fn from(e: duka_commerce::CommerceError) -> Self {
        ApiError(e.into())
    }
}

impl From<duka_sessions::SessionError> for ApiError {
    fn from(e: duka_sessions::SessionError) -> Self {
        ApiError(DukaError::Internal(e.to_string()))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError(DukaError::Serialization(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let details = match &self.0 {
            DukaError::InsufficientPermissions { missing } => json!({"missing": missing}),
            DukaError::RateLimitExceeded { retry_after_secs } => {
                json!({"retry_after_secs": retry_after_secs})
            }
            DukaError::FourEyesViolation { initiator, approver } => {
                json!({"initiator_id": initiator, "approver_id": approver})
            }
            _ => json!({}),
        };
        // Internal errors never leak their message to the caller.
        let message = if status.is_server_error() {
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        let body = Json(json!({
            "error": {
                "code": self.0.code(),
                "message": message,
                "details": details,
            }
        }));

        let mut response = (status, body).into_response();
        if let DukaError::RateLimitExceeded { retry_after_secs } = &self.0 {
            if let Ok(v) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", v);
            }
        }
        response
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_carries_retry_after() {
        let resp = ApiError(DukaError::RateLimitExceeded {
            retry_after_secs: 30,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("Retry-After").unwrap(), "30");
    }

    #[test]
    fn internal_errors_do_not_leak() {
        let resp = ApiError(DukaError::Internal("secret detail".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
