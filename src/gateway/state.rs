use std::sync::Arc;

use crate::db::Database;
use crate::saga::SagaOrchestrator;
use crate::transaction::TransactionService;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TransactionService>,
    pub sagas: Arc<SagaOrchestrator>,
    /// PostgreSQL handle for health checks (absent on the memory backend)
    pub pg_db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(service: Arc<TransactionService>, sagas: Arc<SagaOrchestrator>) -> Self {
        Self {
            service,
            sagas,
            pg_db: None,
        }
    }

    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.pg_db = Some(db);
        self
    }
}
