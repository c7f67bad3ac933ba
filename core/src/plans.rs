use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// The two plan kinds share one lifecycle: at most one active plan of a kind
/// per (student, trainer) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Workout,
    Diet,
}

impl PlanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanKind::Workout => "workout",
            PlanKind::Diet => "diet",
        }
    }

    /// Column holding the coach-authored payload for this kind.
    pub fn payload_field(self) -> &'static str {
        match self {
            PlanKind::Workout => "workout_data",
            PlanKind::Diet => "diet_data",
        }
    }
}

impl std::fmt::Display for PlanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workout or diet plan owned by a student and attributed to a trainer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Plan {
    pub id: Uuid,
    pub kind: PlanKind,
    /// Owning student
    pub user_id: Uuid,
    /// Trainer the plan is attributed to
    pub trainer_slug: String,
    pub title: String,
    pub is_active: bool,
    /// Coach-authored content. Stored and returned verbatim, never interpreted.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a plan
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePlanRequest {
    /// Owning student. Defaults to the caller.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub trainer_slug: String,
    pub title: String,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    /// Initial state. Defaults to active, which deactivates sibling plans.
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Partial update of a plan. Absent fields are left untouched.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdatePlanRequest {
    #[serde(default)]
    pub title: Option<String>,
    /// Replacement payload. An explicit `null` is kept as `Some(Null)` so it
    /// can be rejected rather than read as "unchanged".
    #[serde(default, deserialize_with = "present")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<serde_json::Value>,
    /// `true` runs the activation sequence, `false` deactivates this plan only
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Filters for listing plans. `user_id` defaults to the caller.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PlanQuery {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub trainer_slug: Option<String>,
    /// Only return the active plan(s)
    #[serde(default)]
    pub active_only: bool,
}

fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl UpdatePlanRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.data.is_none() && self.is_active.is_none()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn update_distinguishes_absent_and_null_data() {
        let absent: UpdatePlanRequest =
            serde_json::from_value(json!({"title": "Cut"})).expect("absent data");
        assert_eq!(absent.data, None);

        let null: UpdatePlanRequest =
            serde_json::from_value(json!({"data": null})).expect("null data");
        assert_eq!(null.data, Some(serde_json::Value::Null));
        assert!(!null.is_empty());
    }

    #[test]
    fn kind_round_trips_through_path_segment() {
        let kind: PlanKind = serde_json::from_str("\"diet\"").expect("diet parses");
        assert_eq!(kind, PlanKind::Diet);
        assert_eq!(kind.to_string(), "diet");
        assert_eq!(kind.payload_field(), "diet_data");
        assert_eq!(PlanKind::Workout.payload_field(), "workout_data");
    }

    #[test]
    fn create_request_leaves_activation_to_caller() {
        let req: CreatePlanRequest = serde_json::from_value(serde_json::json!({
            "trainer_slug": "coach-maya",
            "title": "Cut - Week 1",
            "data": {"days": []}
        }))
        .expect("minimal request parses");
        assert!(req.is_active.is_none());
        assert!(req.user_id.is_none());
    }

    #[test]
    fn empty_update_is_detected() {
        assert!(UpdatePlanRequest::default().is_empty());
        let update = UpdatePlanRequest {
            is_active: Some(true),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
