use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use coachlog_core::error::ApiError;
use coachlog_core::logs::{ExerciseLog, LogQuery, UpsertLogRequest, UpsertLogResponse};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::ledger::logs::UpsertCommand;
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/logs", get(list_logs))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/logs", put(upsert_log))
        .route("/v1/logs/{id}", delete(delete_log))
}

/// Record sets for an exercise occurrence
///
/// Merges into the existing log for the same exercise and date (under this
/// workout or a related one) or creates it. Writing to another user's log
/// requires a coach access grant.
#[utoipa::path(
    put,
    path = "/v1/logs",
    request_body = UpsertLogRequest,
    responses(
        (status = 200, description = "Merged into an existing log", body = UpsertLogResponse),
        (status = 201, description = "New log created", body = UpsertLogResponse),
        (status = 400, description = "Malformed sets", body = ApiError),
        (status = 401, description = "Unauthenticated", body = ApiError),
        (status = 403, description = "Coach has no access to this student", body = ApiError),
        (status = 409, description = "Concurrent writes exhausted retries", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "logs"
)]
pub async fn upsert_log(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppJson(req): AppJson<UpsertLogRequest>,
) -> Result<(StatusCode, Json<UpsertLogResponse>), AppError> {
    let cmd = UpsertCommand::from_request(auth.user_id, req)?;
    let response = state.ledger.logs.upsert(cmd).await?;
    let status = if response.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

/// List exercise logs, newest date first
#[utoipa::path(
    get,
    path = "/v1/logs",
    params(LogQuery),
    responses(
        (status = 200, description = "Matching logs, sets by set_number", body = Vec<ExerciseLog>),
        (status = 400, description = "Invalid filter", body = ApiError),
        (status = 401, description = "Unauthenticated", body = ApiError),
        (status = 403, description = "Coach has no access to this student", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "logs"
)]
pub async fn list_logs(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppQuery(query): AppQuery<LogQuery>,
) -> Result<Json<Vec<ExerciseLog>>, AppError> {
    Ok(Json(state.ledger.logs.get_logs(auth.user_id, query).await?))
}

/// Delete one of your own exercise logs
#[utoipa::path(
    delete,
    path = "/v1/logs/{id}",
    params(("id" = Uuid, Path, description = "Exercise log id")),
    responses(
        (status = 204, description = "Log deleted"),
        (status = 403, description = "Not the owner", body = ApiError),
        (status = 404, description = "No such log", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "logs"
)]
pub async fn delete_log(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    state.ledger.logs.delete_log(auth.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
