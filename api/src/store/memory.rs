use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    Clause, Collection, Direction, Filter, RecordStore, Row, StoreError, UnitOfWork, UnitOutcome,
    WriteOp,
};

type Tables = HashMap<Collection, Vec<Row>>;

/// Process-local Record Store.
///
/// Units of work run against a staged copy of the tables under the write lock
/// and replace the live tables only when every op and constraint succeeded.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, collection: Collection, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        filter.validate(collection)?;
        let tables = self.tables.read().await;
        let rows = tables.get(&collection).map(Vec::as_slice).unwrap_or_default();
        Ok(select(rows, filter))
    }

    async fn insert(&self, collection: Collection, row: Row) -> Result<Row, StoreError> {
        let mut outcome = self.commit(UnitOfWork::new().insert(collection, row)).await?;
        outcome
            .pop()
            .and_then(|mut rows| rows.pop())
            .ok_or_else(|| StoreError::Backend("insert returned no row".to_string()))
    }

    async fn update(
        &self,
        collection: Collection,
        filter: &Filter,
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        let mut outcome = self
            .commit(UnitOfWork::new().update(collection, filter.clone(), patch))
            .await?;
        Ok(outcome.pop().unwrap_or_default())
    }

    async fn delete(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        let mut outcome = self
            .commit(UnitOfWork::new().delete(collection, filter.clone()))
            .await?;
        Ok(outcome.pop().map(|rows| rows.len() as u64).unwrap_or(0))
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<UnitOutcome, StoreError> {
        for op in &unit.ops {
            op.validate()?;
        }

        // The write lock serialises every unit, which covers `lock_key` too.
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let mut outcome = Vec::with_capacity(unit.ops.len());
        for op in unit.ops {
            let collection = op.collection();
            let touched = apply(&mut staged, op)?;
            let rows = staged.get(&collection).map(Vec::as_slice).unwrap_or_default();
            check_constraints(collection, rows)?;
            outcome.push(touched);
        }
        *tables = staged;
        Ok(outcome)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn apply(tables: &mut Tables, op: WriteOp) -> Result<Vec<Row>, StoreError> {
    match op {
        WriteOp::Insert { collection, row } => {
            tables.entry(collection).or_default().push(row.clone());
            Ok(vec![row])
        }
        WriteOp::Update {
            collection,
            filter,
            patch,
            required,
        } => {
            let rows = tables.entry(collection).or_default();
            let mut updated = Vec::new();
            for row in rows.iter_mut().filter(|r| matches(r, &filter.clauses)) {
                for (key, value) in &patch {
                    row.insert(key.clone(), value.clone());
                }
                updated.push(row.clone());
            }
            if required && updated.is_empty() {
                return Err(StoreError::NoMatch {
                    collection: collection.table(),
                });
            }
            Ok(updated)
        }
        WriteOp::Delete { collection, filter } => {
            let rows = tables.entry(collection).or_default();
            let (deleted, kept): (Vec<Row>, Vec<Row>) = std::mem::take(rows)
                .into_iter()
                .partition(|r| matches(r, &filter.clauses));
            *rows = kept;
            Ok(deleted)
        }
    }
}

fn select(rows: &[Row], filter: &Filter) -> Vec<Row> {
    let mut selected: Vec<Row> = rows
        .iter()
        .filter(|r| matches(r, &filter.clauses))
        .cloned()
        .collect();

    if !filter.order_by.is_empty() {
        selected.sort_by(|a, b| {
            filter
                .order_by
                .iter()
                .map(|(field, direction)| {
                    let ordering = compare(a.get(field), b.get(field));
                    match direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    }
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    if let Some(limit) = filter.limit {
        selected.truncate(limit);
    }
    selected
}

fn field_value<'a>(row: &'a Row, field: &str) -> &'a Value {
    row.get(field).unwrap_or(&Value::Null)
}

fn matches(row: &Row, clauses: &[Clause]) -> bool {
    clauses.iter().all(|clause| match clause {
        Clause::Eq(field, expected) => field_value(row, field) == expected,
        Clause::AnyOf(field, options) => options.contains(field_value(row, field)),
        Clause::Gte(field, bound) => {
            !field_value(row, field).is_null()
                && compare(row.get(field), Some(bound)) != Ordering::Less
        }
        Clause::Lte(field, bound) => {
            !field_value(row, field).is_null()
                && compare(row.get(field), Some(bound)) != Ordering::Greater
        }
    })
}

/// Nulls first, then numbers, booleans and strings by natural order.
/// RFC 3339 timestamps compare as instants, since serde output trims trailing
/// fractional digits; dates and UUIDv7 ids already sort as plain strings.
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null)) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => match (
            DateTime::parse_from_rfc3339(x),
            DateTime::parse_from_rfc3339(y),
        ) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

fn check_constraints(collection: Collection, rows: &[Row]) -> Result<(), StoreError> {
    for key in collection.unique_keys() {
        let mut seen: Vec<Vec<&Value>> = Vec::with_capacity(rows.len());
        for row in rows {
            let tuple: Vec<&Value> = key.iter().map(|field| field_value(row, field)).collect();
            if tuple.iter().any(|v| v.is_null()) {
                continue;
            }
            if seen.contains(&tuple) {
                return Err(StoreError::Conflict {
                    collection: collection.table(),
                    detail: format!("duplicate ({})", key.join(", ")),
                });
            }
            seen.push(tuple);
        }
    }

    if let Some(exclusive) = collection.exclusive_flag() {
        let mut flagged: Vec<Vec<&Value>> = Vec::new();
        for row in rows {
            if field_value(row, exclusive.flag) != &Value::Bool(true) {
                continue;
            }
            let scope: Vec<&Value> = exclusive
                .scope
                .iter()
                .map(|field| field_value(row, field))
                .collect();
            if flagged.contains(&scope) {
                return Err(StoreError::Conflict {
                    collection: collection.table(),
                    detail: format!(
                        "more than one row with {} per ({})",
                        exclusive.flag,
                        exclusive.scope.join(", ")
                    ),
                });
            }
            flagged.push(scope);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::row;

    fn plan(id: &str, user: &str, trainer: &str, active: bool) -> Row {
        row([
            ("id", json!(id)),
            ("user_id", json!(user)),
            ("trainer_slug", json!(trainer)),
            ("title", json!(format!("plan {id}"))),
            ("is_active", json!(active)),
        ])
    }

    #[test]
    fn timestamps_with_trimmed_fractions_order_as_instants() {
        let whole = json!("2024-06-10T08:00:05Z");
        let fraction = json!("2024-06-10T08:00:05.120Z");
        let later = json!("2024-06-10T08:00:05.123456789Z");
        assert_eq!(compare(Some(&whole), Some(&fraction)), Ordering::Less);
        assert_eq!(compare(Some(&fraction), Some(&later)), Ordering::Less);
        assert_eq!(
            compare(Some(&json!("2024-06-10")), Some(&json!("2024-06-09"))),
            Ordering::Greater
        );
    }

    #[tokio::test]
    async fn oldest_row_wins_within_the_same_second() {
        let store = MemoryStore::new();
        for (id, created_at) in [
            ("late", "2024-06-10T08:00:05.5Z"),
            ("early", "2024-06-10T08:00:05Z"),
        ] {
            let mut workout = plan(id, "u1", "coach", false);
            workout.insert("created_at".to_string(), json!(created_at));
            store.insert(Collection::Workouts, workout).await.expect("insert");
        }

        let oldest = store
            .get(
                Collection::Workouts,
                &Filter::new().order_by("created_at", Direction::Asc).limit(1),
            )
            .await
            .expect("get");
        assert_eq!(oldest[0]["id"], json!("early"));
    }

    #[tokio::test]
    async fn get_filters_orders_and_limits() {
        let store = MemoryStore::new();
        for (id, date) in [("a", "2024-06-10"), ("b", "2024-06-12"), ("c", "2024-06-11")] {
            store
                .insert(
                    Collection::ExerciseLogs,
                    row([
                        ("id", json!(id)),
                        ("user_id", json!("u1")),
                        ("workout_id", json!("w1")),
                        ("exercise_name", json!("Squat")),
                        ("log_date", json!(date)),
                    ]),
                )
                .await
                .expect("insert");
        }

        let rows = store
            .get(
                Collection::ExerciseLogs,
                &Filter::new()
                    .eq("user_id", "u1")
                    .order_by("log_date", Direction::Desc)
                    .limit(2),
            )
            .await
            .expect("get");
        let ids: Vec<&Value> = rows.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!("b"), &json!("c")]);

        let rows = store
            .get(
                Collection::ExerciseLogs,
                &Filter::new().any_of("id", ["a", "c"]),
            )
            .await
            .expect("get");
        assert_eq!(rows.len(), 2);

        let rows = store
            .get(
                Collection::ExerciseLogs,
                &Filter::new()
                    .gte("log_date", "2024-06-11")
                    .lte("log_date", "2024-06-12")
                    .order_by("log_date", Direction::Asc),
            )
            .await
            .expect("get");
        let ids: Vec<&Value> = rows.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!("c"), &json!("b")]);
    }

    #[tokio::test]
    async fn unique_key_violation_is_a_conflict() {
        let store = MemoryStore::new();
        let log = row([
            ("id", json!("a")),
            ("user_id", json!("u1")),
            ("workout_id", json!("w1")),
            ("exercise_name", json!("Squat")),
            ("log_date", json!("2024-06-10")),
        ]);
        store.insert(Collection::ExerciseLogs, log.clone()).await.expect("first insert");

        let mut duplicate = log;
        duplicate.insert("id".to_string(), json!("b"));
        let err = store
            .insert(Collection::ExerciseLogs, duplicate)
            .await
            .expect_err("duplicate must fail");
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn failed_unit_leaves_tables_untouched() {
        let store = MemoryStore::new();
        store
            .insert(Collection::Workouts, plan("a", "u1", "coach", true))
            .await
            .expect("seed");

        let unit = UnitOfWork::locked("u1:coach:workout")
            .update(
                Collection::Workouts,
                Filter::new().eq("user_id", "u1").eq("trainer_slug", "coach"),
                row([("is_active", json!(false))]),
            )
            .update_required(
                Collection::Workouts,
                Filter::new().eq("id", "missing"),
                row([("is_active", json!(true))]),
            );
        let err = store.commit(unit).await.expect_err("required update misses");
        assert!(matches!(err, StoreError::NoMatch { .. }));

        let rows = store
            .get(Collection::Workouts, &Filter::new().eq("id", "a"))
            .await
            .expect("get");
        assert_eq!(rows[0]["is_active"], json!(true));
    }

    #[tokio::test]
    async fn second_active_plan_in_scope_is_rejected() {
        let store = MemoryStore::new();
        store
            .insert(Collection::Diets, plan("a", "u1", "coach", true))
            .await
            .expect("seed");
        store
            .insert(Collection::Diets, plan("b", "u1", "other-coach", true))
            .await
            .expect("different trainer is a different scope");

        let err = store
            .insert(Collection::Diets, plan("c", "u1", "coach", true))
            .await
            .expect_err("two active diets for one scope");
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn delete_reports_count_and_invalid_fields_are_rejected() {
        let store = MemoryStore::new();
        store
            .insert(Collection::Chats, row([("id", json!("c1")), ("user_id", json!("u1"))]))
            .await
            .expect("seed");

        let deleted = store
            .delete(Collection::Chats, &Filter::new().eq("user_id", "u1"))
            .await
            .expect("delete");
        assert_eq!(deleted, 1);

        let err = store
            .get(Collection::Chats, &Filter::new().eq("nope", 1))
            .await
            .expect_err("unknown column");
        assert!(matches!(err, StoreError::InvalidField { .. }));
    }

    #[test]
    fn compare_puts_nulls_first() {
        assert_eq!(compare(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(compare(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
        assert_eq!(compare(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
    }
}
