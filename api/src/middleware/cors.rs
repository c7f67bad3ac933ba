use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

/// Build the CORS layer for the configured origins (`COACHLOG_CORS_ORIGINS`).
///
/// - Methods: GET, POST, PUT, PATCH, DELETE, OPTIONS
/// - Headers: Authorization, Content-Type
/// - Credentials: allowed
/// - Max age: 3600s
pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(header_values(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

/// Skips origins that are not valid header values.
fn header_values(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn invalid_origins_are_skipped() {
        let origins = header_values(&[
            "https://app.coachlog.example".to_string(),
            "bad\norigin".to_string(),
        ]);
        assert_eq!(origins, vec![HeaderValue::from_static("https://app.coachlog.example")]);
    }

    #[tokio::test]
    async fn preflight_allows_patch_from_configured_origin() {
        let app = Router::new()
            .route("/v1/plans/diet", get(|| async { "ok" }))
            .layer(build_cors_layer(&["https://app.coachlog.example".to_string()]));

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/v1/plans/diet")
                    .header("origin", "https://app.coachlog.example")
                    .header("access-control-request-method", "PATCH")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("access-control-allow-origin"),
            Some(&HeaderValue::from_static("https://app.coachlog.example"))
        );
    }
}
