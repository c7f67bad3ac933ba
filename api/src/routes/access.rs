use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use coachlog_core::access::AccessDecision;
use coachlog_core::error::ApiError;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::extract::AppPath;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/access/{student_id}", get(check_access))
}

/// Report whether the calling coach may write to a student's records
///
/// Always 200: a denial is a decision, not an error. Signals whose check
/// failed are listed under `failed` and count as absent.
#[utoipa::path(
    get,
    path = "/v1/access/{student_id}",
    params(("student_id" = Uuid, Path, description = "Student to check access for")),
    responses(
        (status = 200, description = "Access decision with matched signals", body = AccessDecision),
        (status = 401, description = "Unauthenticated", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "access"
)]
pub async fn check_access(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(student_id): AppPath<Uuid>,
) -> Result<Json<AccessDecision>, AppError> {
    Ok(Json(state.ledger.gate.authorize(auth.user_id, student_id).await))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use uuid::Uuid;

    use crate::routes::testing::TestApp;

    #[tokio::test]
    async fn reports_matched_signals() {
        let app = TestApp::new();
        let (coach, student) = (Uuid::now_v7(), Uuid::now_v7());
        let uri = format!("/v1/access/{student}");

        let (status, before) = app.send(Method::GET, &uri, Some(coach), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(before["granted"], false);

        app.link_coach(coach, "coach-maya", student).await;
        let (_, after) = app.send(Method::GET, &uri, Some(coach), None).await;
        assert_eq!(after["granted"], true);
        assert_eq!(after["matched"], json!(["approved_request"]));
        assert!(after.get("failed").is_none());
    }
}
