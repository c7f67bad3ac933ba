use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use coachlog_core::error::ApiError;
use coachlog_core::plans::{CreatePlanRequest, Plan, PlanKind, PlanQuery, UpdatePlanRequest};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/plans/{kind}", get(list_plans).post(create_plan))
        .route("/v1/plans/{kind}/{id}", get(get_plan).patch(update_plan))
        .route("/v1/plans/{kind}/{id}/activate", post(activate_plan))
        .route("/v1/plans/{kind}/{id}/deactivate", post(deactivate_plan))
}

/// List workout or diet plans for a student
#[utoipa::path(
    get,
    path = "/v1/plans/{kind}",
    params(("kind" = PlanKind, Path, description = "workout or diet"), PlanQuery),
    responses(
        (status = 200, description = "Plans, newest first", body = Vec<Plan>),
        (status = 403, description = "Coach has no access to this student", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "plans"
)]
pub async fn list_plans(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(kind): AppPath<PlanKind>,
    AppQuery(query): AppQuery<PlanQuery>,
) -> Result<Json<Vec<Plan>>, AppError> {
    Ok(Json(state.ledger.plans.list(auth.user_id, kind, query).await?))
}

/// Create a plan
///
/// Plans start active unless `is_active` is false; activating deactivates the
/// previous plan of this kind for the same student and trainer.
#[utoipa::path(
    post,
    path = "/v1/plans/{kind}",
    params(("kind" = PlanKind, Path, description = "workout or diet")),
    request_body = CreatePlanRequest,
    responses(
        (status = 201, description = "Plan created", body = Plan),
        (status = 400, description = "Invalid plan", body = ApiError),
        (status = 403, description = "Not allowed to manage this student's plans", body = ApiError),
        (status = 409, description = "Activation raced with another request", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "plans"
)]
pub async fn create_plan(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(kind): AppPath<PlanKind>,
    AppJson(req): AppJson<CreatePlanRequest>,
) -> Result<(StatusCode, Json<Plan>), AppError> {
    let plan = state.ledger.plans.create(auth.user_id, kind, req).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

#[utoipa::path(
    get,
    path = "/v1/plans/{kind}/{id}",
    params(
        ("kind" = PlanKind, Path, description = "workout or diet"),
        ("id" = Uuid, Path, description = "Plan id")
    ),
    responses(
        (status = 200, description = "The plan", body = Plan),
        (status = 404, description = "No such plan", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "plans"
)]
pub async fn get_plan(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath((kind, id)): AppPath<(PlanKind, Uuid)>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(state.ledger.plans.get(auth.user_id, kind, id).await?))
}

/// Edit a plan's title or payload, or toggle it
#[utoipa::path(
    patch,
    path = "/v1/plans/{kind}/{id}",
    params(
        ("kind" = PlanKind, Path, description = "workout or diet"),
        ("id" = Uuid, Path, description = "Plan id")
    ),
    request_body = UpdatePlanRequest,
    responses(
        (status = 200, description = "Updated plan", body = Plan),
        (status = 400, description = "Empty or invalid update", body = ApiError),
        (status = 404, description = "No such plan", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "plans"
)]
pub async fn update_plan(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath((kind, id)): AppPath<(PlanKind, Uuid)>,
    AppJson(req): AppJson<UpdatePlanRequest>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(state.ledger.plans.update(auth.user_id, kind, id, req).await?))
}

/// Make this the single active plan of its kind for its student and trainer
#[utoipa::path(
    post,
    path = "/v1/plans/{kind}/{id}/activate",
    params(
        ("kind" = PlanKind, Path, description = "workout or diet"),
        ("id" = Uuid, Path, description = "Plan id")
    ),
    responses(
        (status = 200, description = "Plan is now active", body = Plan),
        (status = 404, description = "No such plan", body = ApiError),
        (status = 409, description = "Activation raced with another request", body = ApiError),
        (status = 503, description = "Record store unavailable", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "plans"
)]
pub async fn activate_plan(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath((kind, id)): AppPath<(PlanKind, Uuid)>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(state.ledger.plans.activate(auth.user_id, kind, id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/plans/{kind}/{id}/deactivate",
    params(
        ("kind" = PlanKind, Path, description = "workout or diet"),
        ("id" = Uuid, Path, description = "Plan id")
    ),
    responses(
        (status = 200, description = "Plan is now inactive", body = Plan),
        (status = 404, description = "No such plan", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "plans"
)]
pub async fn deactivate_plan(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath((kind, id)): AppPath<(PlanKind, Uuid)>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(state.ledger.plans.deactivate(auth.user_id, kind, id).await?))
}
