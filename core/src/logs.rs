use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::sets::SetEntry;

/// Who authored a write to a student's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WriterRole {
    /// The owning student
    Student,
    /// A trainer writing into a student's log
    Coach,
}

impl WriterRole {
    pub fn as_str(self) -> &'static str {
        match self {
            WriterRole::Student => "student",
            WriterRole::Coach => "coach",
        }
    }
}

/// Performed sets for one exercise on one date, under one workout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExerciseLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub workout_id: Uuid,
    pub exercise_name: String,
    pub log_date: NaiveDate,
    /// Sets in stored order (reads return them sorted by set_number)
    #[schema(value_type = Vec<Object>)]
    pub sets: Vec<SetEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Present when the last write came from a coach
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by_role: Option<WriterRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by_user_id: Option<Uuid>,
    /// Bumped on every write; used for compare-and-swap updates
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to record sets for an exercise occurrence.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertLogRequest {
    /// Owning student. Defaults to the caller; a different id makes this a coach write.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub workout_id: Uuid,
    /// Other workouts of the same block to search before creating a new log
    #[serde(default)]
    pub related_workout_ids: Vec<Uuid>,
    /// Resolve the block of `workout_id` server-side when no related ids are given
    #[serde(default)]
    pub include_block: bool,
    pub exercise_name: String,
    pub log_date: NaiveDate,
    /// Set updates; each entry needs a positive `set_number`
    #[schema(value_type = Vec<Object>)]
    pub sets: Vec<serde_json::Value>,
    /// Absent keeps stored notes; any present value, including "", replaces them
    #[serde(default)]
    pub notes: Option<String>,
}

/// Upsert result: the stored log and whether it was newly created.
#[derive(Debug, Serialize, ToSchema)]
pub struct UpsertLogResponse {
    #[serde(flatten)]
    pub log: ExerciseLog,
    pub created: bool,
}

/// Filters for reading logs. Every field is optional; `user_id` defaults to the caller.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogQuery {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub workout_id: Option<Uuid>,
    #[serde(default)]
    pub exercise_name: Option<String>,
    /// Exact calendar date
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Inclusive lower bound on `log_date`
    #[serde(default)]
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound on `log_date`
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl LogQuery {
    /// `from` after `to` can never match; callers reject it up front.
    pub fn has_inverted_range(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from > to)
    }
}

/// Notes resolution for a merged write: absent keeps, present overwrites.
pub fn resolve_notes(existing: Option<String>, incoming: Option<String>) -> Option<String> {
    incoming.or(existing)
}
