use std::sync::Arc;

use crate::auth::IdentityProvider;
use crate::ledger::Ledger;
use crate::store::RecordStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub ledger: Ledger,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            store,
            identity,
        }
    }
}
