use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer =
    GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, Body>;

/// Token bucket per client IP: one token every `replenish_ms`, up to `burst`.
fn layer(name: &'static str, replenish_ms: u64, burst: u32) -> RateLimitLayer {
    let config = GovernorConfigBuilder::default()
        .per_millisecond(replenish_ms)
        .burst_size(burst)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .unwrap_or_else(|| panic!("invalid governor config for {name}"));
    GovernorLayer::new(config).error_handler(json_error_handler)
}

/// Rate limit for GET /v1/logs: 120 requests/minute per IP.
pub fn logs_read_layer() -> RateLimitLayer {
    layer("logs_read", 500, 30)
}

/// Rate limit for PUT and DELETE on /v1/logs: 60 requests/minute per IP.
///
/// A coach logging a session sends one write per set, so bursts are generous.
pub fn logs_write_layer() -> RateLimitLayer {
    layer("logs_write", 1000, 40)
}

/// Rate limit for /v1/plans and /v1/workouts: 60 requests/minute per IP.
pub fn plans_layer() -> RateLimitLayer {
    layer("plans", 1000, 20)
}

/// Rate limit for GET /v1/access: 30 requests/minute per IP.
pub fn access_layer() -> RateLimitLayer {
    layer("access", 2000, 10)
}

/// Error handler that returns JSON in ApiError format with a Retry-After header.
fn json_error_handler(err: GovernorError) -> Response<Body> {
    let (status, retry_after, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (code, None, msg.unwrap_or_default()),
    };

    let body = serde_json::json!({
        "error": coachlog_core::error::codes::RATE_LIMITED,
        "message": message,
        "request_id": uuid::Uuid::now_v7().to_string(),
    });

    let mut response = (status, axum::Json(body)).into_response();
    if let Some(wait) = retry_after {
        response
            .headers_mut()
            .insert("retry-after", HeaderValue::from(wait));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn too_many_requests_carries_retry_after() {
        let response = json_error_handler(GovernorError::TooManyRequests {
            wait_time: 7,
            headers: None,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("retry-after"),
            Some(&HeaderValue::from_static("7"))
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["error"], "rate_limited");
    }

    #[test]
    fn unknown_client_is_a_server_error() {
        let response = json_error_handler(GovernorError::UnableToExtractKey);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("retry-after").is_none());
    }
}
