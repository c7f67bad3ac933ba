//! Record Store: keyed, filterable, transactional row storage.
//!
//! The engine talks to storage only through [`RecordStore`]. Rows are JSON
//! objects so the same contract is served by Postgres in production and by an
//! in-process map in dev mode and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Workouts,
    Diets,
    ExerciseLogs,
    Trainers,
    Chats,
    StudentTrainers,
    AccessRequests,
}

/// Constraint: at most one row with `flag = true` per `scope` tuple.
pub struct ExclusiveFlag {
    pub flag: &'static str,
    pub scope: &'static [&'static str],
}

impl Collection {
    pub fn table(self) -> &'static str {
        match self {
            Collection::Workouts => "workouts",
            Collection::Diets => "diets",
            Collection::ExerciseLogs => "exercise_logs",
            Collection::Trainers => "trainers",
            Collection::Chats => "chats",
            Collection::StudentTrainers => "student_trainers",
            Collection::AccessRequests => "access_requests",
        }
    }

    /// Column whitelist. Filters and patches naming anything else are rejected.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Collection::Workouts => &[
                "id",
                "user_id",
                "trainer_slug",
                "title",
                "is_active",
                "workout_data",
                "created_at",
                "updated_at",
            ],
            Collection::Diets => &[
                "id",
                "user_id",
                "trainer_slug",
                "title",
                "is_active",
                "diet_data",
                "created_at",
                "updated_at",
            ],
            Collection::ExerciseLogs => &[
                "id",
                "user_id",
                "workout_id",
                "exercise_name",
                "log_date",
                "sets",
                "notes",
                "updated_by_role",
                "updated_by_user_id",
                "revision",
                "created_at",
                "updated_at",
            ],
            Collection::Trainers => &["id", "user_id", "slug", "display_name", "created_at"],
            Collection::Chats => &["id", "user_id", "trainer_slug", "created_at"],
            Collection::StudentTrainers => &[
                "id",
                "student_id",
                "trainer_slug",
                "status",
                "created_at",
            ],
            Collection::AccessRequests => &[
                "id",
                "student_id",
                "trainer_slug",
                "status",
                "created_at",
            ],
        }
    }

    pub fn has_column(self, field: &str) -> bool {
        self.columns().contains(&field)
    }

    /// Column sets that must be unique across rows.
    pub fn unique_keys(self) -> &'static [&'static [&'static str]] {
        match self {
            Collection::ExerciseLogs => &[&["user_id", "workout_id", "exercise_name", "log_date"]],
            Collection::Trainers => &[&["slug"], &["user_id"]],
            _ => &[],
        }
    }

    pub fn exclusive_flag(self) -> Option<ExclusiveFlag> {
        match self {
            Collection::Workouts | Collection::Diets => Some(ExclusiveFlag {
                flag: "is_active",
                scope: &["user_id", "trainer_slug"],
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Eq(String, Value),
    AnyOf(String, Vec<Value>),
    /// Inclusive lower bound
    Gte(String, Value),
    /// Inclusive upper bound
    Lte(String, Value),
}

impl Clause {
    pub fn field(&self) -> &str {
        match self {
            Clause::Eq(field, _)
            | Clause::AnyOf(field, _)
            | Clause::Gte(field, _)
            | Clause::Lte(field, _) => field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Conjunction of clauses with optional ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub clauses: Vec<Clause>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.to_string(), value.into()));
        self
    }

    pub fn any_of<V: Into<Value>>(
        mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.clauses.push(Clause::AnyOf(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn gte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Gte(field.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Lte(field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.clauses
            .iter()
            .map(Clause::field)
            .chain(self.order_by.iter().map(|(field, _)| field.as_str()))
    }

    pub fn validate(&self, collection: Collection) -> Result<(), StoreError> {
        check_fields(collection, self.fields())
    }
}

pub(crate) fn check_fields<'a>(
    collection: Collection,
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<(), StoreError> {
    for field in fields {
        if !collection.has_column(field) {
            return Err(StoreError::InvalidField {
                collection: collection.table(),
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        collection: Collection,
        row: Row,
    },
    Update {
        collection: Collection,
        filter: Filter,
        patch: Row,
        /// Abort the whole unit of work when nothing matches.
        required: bool,
    },
    Delete {
        collection: Collection,
        filter: Filter,
    },
}

impl WriteOp {
    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::Insert { collection, .. }
            | WriteOp::Update { collection, .. }
            | WriteOp::Delete { collection, .. } => *collection,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        match self {
            WriteOp::Insert { collection, row } => {
                check_fields(*collection, row.keys().map(String::as_str))
            }
            WriteOp::Update {
                collection,
                filter,
                patch,
                ..
            } => {
                filter.validate(*collection)?;
                check_fields(*collection, patch.keys().map(String::as_str))
            }
            WriteOp::Delete { collection, filter } => filter.validate(*collection),
        }
    }
}

/// Ordered writes applied all-or-nothing.
///
/// When `lock_key` is set, units sharing the key are serialised by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    pub lock_key: Option<String>,
    pub ops: Vec<WriteOp>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locked(lock_key: impl Into<String>) -> Self {
        Self {
            lock_key: Some(lock_key.into()),
            ops: Vec::new(),
        }
    }

    pub fn insert(mut self, collection: Collection, row: Row) -> Self {
        self.ops.push(WriteOp::Insert { collection, row });
        self
    }

    pub fn update(mut self, collection: Collection, filter: Filter, patch: Row) -> Self {
        self.ops.push(WriteOp::Update {
            collection,
            filter,
            patch,
            required: false,
        });
        self
    }

    /// Update that must match at least one row or the unit is rolled back.
    pub fn update_required(mut self, collection: Collection, filter: Filter, patch: Row) -> Self {
        self.ops.push(WriteOp::Update {
            collection,
            filter,
            patch,
            required: true,
        });
        self
    }

    pub fn delete(mut self, collection: Collection, filter: Filter) -> Self {
        self.ops.push(WriteOp::Delete { collection, filter });
        self
    }
}

/// Rows touched by each op of a committed unit, in op order: inserted,
/// updated (post-image) or deleted rows.
pub type UnitOutcome = Vec<Vec<Row>>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient backend failure; safe to retry.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    /// A uniqueness or exclusivity constraint rejected the write.
    #[error("write conflict on {collection}: {detail}")]
    Conflict {
        collection: &'static str,
        detail: String,
    },
    /// A required update matched no row; the unit of work was rolled back.
    #[error("no {collection} row matched a required update")]
    NoMatch { collection: &'static str },
    #[error("unknown field '{field}' for {collection}")]
    InvalidField {
        collection: &'static str,
        field: String,
    },
    #[error("record store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, collection: Collection, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, collection: Collection, row: Row) -> Result<Row, StoreError>;

    /// Apply `patch` to every matching row and return the updated rows.
    async fn update(
        &self,
        collection: Collection,
        filter: &Filter,
        patch: Row,
    ) -> Result<Vec<Row>, StoreError>;

    /// Returns the number of deleted rows.
    async fn delete(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError>;

    /// Apply every op atomically, in order.
    async fn commit(&self, unit: UnitOfWork) -> Result<UnitOutcome, StoreError>;

    async fn exists(&self, collection: Collection, filter: &Filter) -> Result<bool, StoreError> {
        let rows = self.get(collection, &filter.clone().limit(1)).await?;
        Ok(!rows.is_empty())
    }

    /// Cheap reachability check for health endpoints.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Build a row from `(column, value)` pairs.
pub fn row<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Row {
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
