//! Training record consolidation: the rules that keep a student's ledger
//! consistent under concurrent writes from the student and their coaches.

pub mod access;
pub mod blocks;
pub mod logs;
pub mod plans;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::store::{Collection, Filter, RecordStore, Row, StoreError, UnitOfWork, UnitOutcome};

pub use access::AccessControlGate;
pub use blocks::RelatedWorkoutResolver;
pub use logs::ExerciseLogService;
pub use plans::PlanActivationManager;

/// Engine error taxonomy. The HTTP layer maps each variant to a status code.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{message}")]
    Forbidden {
        message: String,
        /// How the caller could get past this particular denial
        hint: Option<&'static str>,
    },
    #[error("{resource} not found")]
    NotFound { resource: String },
    #[error("{message}")]
    Conflict { message: String },
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
    },
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
            field: Some(field.into()),
            received: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        LedgerError::Forbidden {
            message: message.into(),
            hint: None,
        }
    }

    pub fn forbidden_with_hint(message: impl Into<String>, hint: &'static str) -> Self {
        LedgerError::Forbidden {
            message: message.into(),
            hint: Some(hint),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(detail) => LedgerError::StoreUnavailable(detail),
            StoreError::Conflict { collection, detail } => LedgerError::Conflict {
                message: format!("Concurrent write to {collection} lost: {detail}"),
            },
            StoreError::NoMatch { collection } => LedgerError::NotFound {
                resource: collection.to_string(),
            },
            other @ (StoreError::InvalidField { .. } | StoreError::Backend(_)) => {
                LedgerError::Internal(other.to_string())
            }
        }
    }
}

/// Run a store call, retrying exactly once when the failure is transient.
pub(crate) async fn retry_transient<T, F, Fut>(
    operation: &'static str,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match call().await {
        Err(err) if err.is_transient() => {
            tracing::warn!(
                operation = operation,
                error = %err,
                "transient store failure, retrying once"
            );
            call().await
        }
        other => other,
    }
}

/// The Record Store as seen by the engine: every call retried once on
/// transient failure.
#[derive(Clone)]
pub struct LedgerStore {
    inner: Arc<dyn RecordStore>,
}

impl LedgerStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self { inner }
    }

    pub async fn get(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Row>, StoreError> {
        retry_transient("get", || self.inner.get(collection, filter)).await
    }

    pub async fn exists(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<bool, StoreError> {
        retry_transient("exists", || self.inner.exists(collection, filter)).await
    }

    pub async fn delete(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        retry_transient("delete", || self.inner.delete(collection, filter)).await
    }

    pub async fn commit(&self, unit: UnitOfWork) -> Result<UnitOutcome, StoreError> {
        retry_transient("commit", || self.inner.commit(unit.clone())).await
    }
}

/// Engine services sharing one store.
#[derive(Clone)]
pub struct Ledger {
    pub gate: AccessControlGate,
    pub plans: PlanActivationManager,
    pub logs: ExerciseLogService,
    pub blocks: RelatedWorkoutResolver,
}

impl Ledger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let store = LedgerStore::new(store);
        let gate = AccessControlGate::new(store.clone());
        let blocks = RelatedWorkoutResolver::new(store.clone());
        Self {
            plans: PlanActivationManager::new(store.clone(), gate.clone()),
            logs: ExerciseLogService::new(store, gate.clone(), blocks.clone()),
            gate,
            blocks,
        }
    }
}

pub(crate) fn decode<T: DeserializeOwned>(
    collection: Collection,
    row: Row,
) -> Result<T, LedgerError> {
    serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| {
        LedgerError::Internal(format!("Malformed {} row: {e}", collection.table()))
    })
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Row, LedgerError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(row)) => Ok(row),
        Ok(_) => Err(LedgerError::Internal("Record did not serialize to an object".to_string())),
        Err(e) => Err(LedgerError::Internal(format!("Failed to serialize record: {e}"))),
    }
}

/// The single row a one-op unit of work produced.
pub(crate) fn single_row(
    mut outcome: UnitOutcome,
    collection: Collection,
) -> Result<Row, LedgerError> {
    outcome
        .pop()
        .and_then(|mut rows| rows.pop())
        .ok_or_else(|| LedgerError::NotFound {
            resource: collection.table().to_string(),
        })
}
