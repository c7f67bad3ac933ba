//! Extractors that turn axum rejections into structured `AppError` responses.
//!
//! Use `AppJson<T>`, `AppQuery<T>` and `AppPath<T>` in place of the axum
//! extractors so malformed input yields the JSON error envelope instead of a
//! plain-text body.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use axum::Json;

use crate::error::AppError;

const SCHEMA_HINT: &str =
    "Check the request against the endpoint's schema (GET /api-doc/openapi.json).";

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub struct AppQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(AppQuery(value)),
            Err(rejection) => Err(invalid_input("query", rejection.body_text())),
        }
    }
}

pub struct AppPath<T>(pub T);

impl<S, T> FromRequestParts<S> for AppPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(AppPath(value)),
            Err(rejection) => Err(invalid_input("path", rejection.body_text())),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    invalid_input("body", rejection.body_text())
}

fn invalid_input(location: &str, detail: String) -> AppError {
    // "missing field `log_date`" -> field = "log_date"
    let field = extract_field_from_serde_message(&detail).unwrap_or_else(|| location.to_string());
    AppError::Validation {
        message: format!("Invalid request {location}: {detail}"),
        field: Some(field),
        received: None,
        docs_hint: Some(SCHEMA_HINT.to_string()),
    }
}

fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    ["missing field `", "unknown field `"].iter().find_map(|pattern| {
        let after = &msg[msg.find(pattern)? + pattern.len()..];
        after.find('`').map(|end| after[..end].to_string())
    })
}
