use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error;
use std::fmt;

use crate::middleware::anti_replay::ReplayRejection;
use crate::middleware::csrf::CsrfRejection;

/// The primary error type for the application.
///
/// Every middleware rejection and handler failure ends up here, so all of them
/// share one JSON error shape.
#[derive(Debug)]
pub enum AppError {
    /// For internal server errors that are not expected to be handled by the client.
    Internal(anyhow::Error),
    /// For client errors due to invalid requests.
    BadRequest(String),
    /// The client's token bucket is empty.
    RateLimited {
        /// Whole seconds to wait before retrying the request.
        retry_after_seconds: u64,
    },
    /// Replay protection refused the request (stale timestamp, reused nonce, ...).
    Replay(ReplayRejection),
    /// The double-submit CSRF check failed.
    Csrf(CsrfRejection),
    /// The route requires a session that existed before this request.
    SessionRequired,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::RateLimited { retry_after_seconds } => {
                write!(f, "Rate limited. Retry after {} seconds", retry_after_seconds)
            }
            AppError::Replay(r) => write!(f, "Replay protection: {}", r),
            AppError::Csrf(r) => write!(f, "CSRF protection: {}", r),
            AppError::SessionRequired => write!(f, "Session required"),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(e.as_ref()),
            AppError::Replay(r) => Some(r),
            AppError::Csrf(r) => Some(r),
            _ => None,
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Replay(_) | AppError::SessionRequired => StatusCode::UNAUTHORIZED,
            AppError::Csrf(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut retry_after = None;
        let (error_code, error_message, details) = match self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                let error_id = uuid::Uuid::new_v4();
                tracing::error!("Error ID: {}", error_id);
                (
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::BadRequest(msg) => ("BAD_REQUEST", msg, None),
            AppError::RateLimited { retry_after_seconds } => {
                retry_after = Some(retry_after_seconds);
                (
                    "RATE_LIMITED",
                    format!("Too many requests. Please retry after {} seconds", retry_after_seconds),
                    Some(json!({ "retry_after_seconds": retry_after_seconds })),
                )
            }
            AppError::Replay(r) => {
                ("REPLAY_REJECTED", r.to_string(), Some(json!({ "reason": r.reason() })))
            }
            AppError::Csrf(r) => ("CSRF_REJECTED", r.to_string(), Some(json!({ "reason": r.reason() }))),
            AppError::SessionRequired => {
                ("SESSION_REQUIRED", "An established session is required".to_string(), None)
            }
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": error_message,
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<ReplayRejection> for AppError {
    fn from(r: ReplayRejection) -> Self {
        AppError::Replay(r)
    }
}

impl From<CsrfRejection> for AppError {
    fn from(r: CsrfRejection) -> Self {
        AppError::Csrf(r)
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;
