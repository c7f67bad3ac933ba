use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use coachlog_core::blocks::TrainingBlock;
use coachlog_core::error::ApiError;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppQuery;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/workouts/blocks", get(list_blocks))
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BlocksQuery {
    /// Student whose workouts to group. Defaults to the caller.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// Only this trainer's workouts. Blocks never mix trainers either way.
    #[serde(default)]
    pub trainer_slug: Option<String>,
}

/// Group a student's workouts into multi-week training blocks
///
/// Workouts titled "<base> - Week N" from the same trainer share a block;
/// each block lists its workouts in week order.
#[utoipa::path(
    get,
    path = "/v1/workouts/blocks",
    params(BlocksQuery),
    responses(
        (status = 200, description = "Blocks per trainer by base title", body = Vec<TrainingBlock>),
        (status = 403, description = "Coach has no access to this student", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "workouts"
)]
pub async fn list_blocks(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppQuery(query): AppQuery<BlocksQuery>,
) -> Result<Json<Vec<TrainingBlock>>, AppError> {
    let owner = query.user_id.unwrap_or(auth.user_id);
    state.ledger.gate.authorize_caller(auth.user_id, owner).await?;
    let trainer_slug = query.trainer_slug.as_deref().map(str::trim);
    Ok(Json(state.ledger.blocks.blocks_for(owner, trainer_slug).await?))
}
