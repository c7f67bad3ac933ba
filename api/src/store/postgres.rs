use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::{
    Clause, Collection, Direction, Filter, RecordStore, Row, StoreError, UnitOfWork, UnitOutcome,
    WriteOp,
};

/// Postgres-backed Record Store.
///
/// Rows travel as JSON: reads use `to_jsonb`, writes go through
/// `jsonb_populate_record` so column types stay with the schema. Identifiers
/// come from the collection whitelist only; every value is a bind parameter.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn get(&self, collection: Collection, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        filter.validate(collection)?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT to_jsonb(t.*) FROM ");
        qb.push(collection.table()).push(" AS t");
        push_where(&mut qb, collection.table(), filter);
        push_order_and_limit(&mut qb, filter);

        let rows = qb
            .build_query_scalar::<Json<Row>>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx(collection.table(), e))?;
        Ok(rows.into_iter().map(|Json(row)| row).collect())
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx("transaction", e))?;

        if let Some(lock_key) = &unit.lock_key {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(lock_key)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx("transaction", e))?;
        }

        let mut outcome = Vec::with_capacity(unit.ops.len());
        for op in unit.ops {
            // Returning early drops `tx`, which rolls the whole unit back.
            outcome.push(run_op(&mut *tx, op).await?);
        }

        tx.commit().await.map_err(|e| map_sqlx("transaction", e))?;
        Ok(outcome)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| map_sqlx("health", e))
    }
}

async fn run_op(conn: &mut PgConnection, op: WriteOp) -> Result<Vec<Row>, StoreError> {
    let collection = op.collection();
    let table = collection.table();

    let mut qb = match op {
        WriteOp::Insert { row, .. } => {
            let columns: Vec<&str> = row.keys().map(String::as_str).collect();
            let column_list = columns.join(", ");
            let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO ");
            qb.push(table)
                .push(" AS t (")
                .push(&column_list)
                .push(") SELECT ")
                .push(&column_list)
                .push(" FROM jsonb_populate_record(NULL::")
                .push(table)
                .push(", ")
                .push_bind(Json(Value::Object(row)))
                .push(") RETURNING to_jsonb(t.*)");
            qb
        }
        WriteOp::Update {
            filter,
            patch,
            required,
            ..
        } => {
            let mut qb = QueryBuilder::<Postgres>::new("");
            if patch.is_empty() {
                qb.push("SELECT to_jsonb(t.*) FROM ").push(table).push(" AS t");
                push_where(&mut qb, table, &filter);
            } else {
                qb.push("UPDATE ").push(table).push(" AS t SET ");
                let mut assignments = qb.separated(", ");
                for column in patch.keys() {
                    assignments.push(format!("{column} = p.{column}"));
                }
                qb.push(" FROM jsonb_populate_record(NULL::")
                    .push(table)
                    .push(", ")
                    .push_bind(Json(Value::Object(patch)))
                    .push(") AS p");
                push_where(&mut qb, table, &filter);
                qb.push(" RETURNING to_jsonb(t.*)");
            }

            let rows = fetch_rows(&mut qb, conn, table).await?;
            if required && rows.is_empty() {
                return Err(StoreError::NoMatch { collection: table });
            }
            return Ok(rows);
        }
        WriteOp::Delete { filter, .. } => {
            let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM ");
            qb.push(table).push(" AS t");
            push_where(&mut qb, table, &filter);
            qb.push(" RETURNING to_jsonb(t.*)");
            qb
        }
    };

    fetch_rows(&mut qb, conn, table).await
}

async fn fetch_rows(
    qb: &mut QueryBuilder<'_, Postgres>,
    conn: &mut PgConnection,
    table: &'static str,
) -> Result<Vec<Row>, StoreError> {
    let rows = qb
        .build_query_scalar::<Json<Row>>()
        .fetch_all(conn)
        .await
        .map_err(|e| map_sqlx(table, e))?;
    Ok(rows.into_iter().map(|Json(row)| row).collect())
}

/// Equality is compared as jsonb so one bind shape serves every column type.
/// Range bounds are cast through the table's record type to compare natively.
fn push_where(qb: &mut QueryBuilder<'_, Postgres>, table: &str, filter: &Filter) {
    for (i, clause) in filter.clauses.iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        match clause {
            Clause::Eq(field, Value::Null) => {
                qb.push(format!("t.{field} IS NULL"));
            }
            Clause::Eq(field, value) => {
                qb.push(format!("to_jsonb(t.{field}) = "))
                    .push_bind(Json(value.clone()));
            }
            Clause::AnyOf(field, values) => {
                qb.push(format!("to_jsonb(t.{field}) = ANY("))
                    .push_bind(values.iter().cloned().map(Json).collect::<Vec<_>>())
                    .push(")");
            }
            Clause::Gte(field, bound) | Clause::Lte(field, bound) => {
                let op = if matches!(clause, Clause::Gte(..)) { ">=" } else { "<=" };
                qb.push(format!("t.{field} {op} (jsonb_populate_record(NULL::{table}, "))
                    .push_bind(Json(serde_json::json!({ field.as_str(): bound })))
                    .push(format!(")).{field}"));
            }
        }
    }
}

fn push_order_and_limit(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    if !filter.order_by.is_empty() {
        qb.push(" ORDER BY ");
        let mut order = qb.separated(", ");
        for (field, direction) in &filter.order_by {
            let direction = match direction {
                Direction::Asc => "ASC NULLS FIRST",
                Direction::Desc => "DESC NULLS LAST",
            };
            order.push(format!("t.{field} {direction}"));
        }
    }
    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(limit as i64);
    }
}

fn map_sqlx(collection: &'static str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // unique_violation, serialization_failure, deadlock_detected
            Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict {
                collection,
                detail: db_err.message().to_string(),
            },
            _ => StoreError::Backend(err.to_string()),
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}
