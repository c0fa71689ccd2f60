#[cfg(test)]
mod tests {
    use crate::error::AppError;
    use crate::middleware::anti_replay::ReplayRejection;
    use crate::middleware::csrf::CsrfRejection;
    use axum::{
        http::{header, StatusCode},
        response::IntoResponse,
    };
    use serde_json::Value;

    async fn body_json(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::RateLimited { retry_after_seconds: 1 }.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::Replay(ReplayRejection::Replay).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::SessionRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Csrf(CsrfRejection::Mismatch).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_conversions() {
        let err: AppError = ReplayRejection::StaleTimestamp.into();
        assert!(matches!(err, AppError::Replay(ReplayRejection::StaleTimestamp)));

        let err: AppError = CsrfRejection::NotBound.into();
        assert!(matches!(err, AppError::Csrf(CsrfRejection::NotBound)));

        let err: AppError = anyhow::anyhow!("db down").into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let response = AppError::RateLimited { retry_after_seconds: 3 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3");

        let (_, body) = body_json(AppError::RateLimited { retry_after_seconds: 3 }).await;
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
        assert_eq!(body["error"]["details"]["retry_after_seconds"], 3);
        assert_eq!(body["status"], 429);
    }

    #[tokio::test]
    async fn test_rejection_reasons_in_body() {
        let (status, body) = body_json(AppError::Replay(ReplayRejection::MissingHeaders)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "REPLAY_REJECTED");
        assert_eq!(body["error"]["details"]["reason"], "missing_headers");

        let (status, body) = body_json(AppError::Csrf(CsrfRejection::Missing)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "CSRF_REJECTED");
        assert_eq!(body["error"]["details"]["reason"], "missing");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let (status, body) = body_json(AppError::Internal(anyhow::anyhow!("secret connection string"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(!body.to_string().contains("secret connection string"));
        assert!(body["error"]["details"]["error_id"].is_string());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_bad_request_has_no_details() {
        let (_, body) = body_json(AppError::BadRequest("'message' must not be empty".into())).await;
        assert_eq!(body["error"]["message"], "'message' must not be empty");
        assert!(body["error"].get("details").is_none());
    }
}
