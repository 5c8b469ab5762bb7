use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use rowstage_core::TableRef;
use rowstage_engine::{ColumnMeta, ConnectionHandle, ExecutionError, ExecutionService};

/// In-process stand-in for the query-execution layer. Records every
/// transaction it is handed, can be told to fail the next one, and can
/// hold a transaction open until released.
#[derive(Default)]
pub struct ScriptedExecutionService {
    transactions: Mutex<Vec<Vec<String>>>,
    failure: Mutex<Option<ExecutionError>>,
    columns: Mutex<HashMap<TableRef, Vec<ColumnMeta>>>,
    gate: Mutex<Option<Arc<Notify>>>,
    started: Notify,
}

impl ScriptedExecutionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: ExecutionError) {
        *self.failure.lock() = Some(error);
    }

    pub fn set_columns(&self, table: TableRef, columns: Vec<ColumnMeta>) {
        self.columns.lock().insert(table, columns);
    }

    /// Block subsequent transactions until the returned gate is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Resolves once a transaction has reached the service.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    pub fn transactions(&self) -> Vec<Vec<String>> {
        self.transactions.lock().clone()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().len()
    }
}

#[async_trait]
impl ExecutionService for ScriptedExecutionService {
    async fn execute_transaction(
        &self,
        handle: &ConnectionHandle,
        statements: &[String],
    ) -> Result<usize, ExecutionError> {
        debug!(%handle, statements = statements.len(), "scripted transaction");
        self.transactions.lock().push(statements.to_vec());
        self.started.notify_one();

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        match self.failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(statements.len()),
        }
    }

    async fn fetch_columns(
        &self,
        handle: &ConnectionHandle,
        table: &TableRef,
    ) -> Result<Vec<ColumnMeta>, ExecutionError> {
        self.columns
            .lock()
            .get(table)
            .cloned()
            .ok_or_else(|| ExecutionError::database(format!("{handle}: relation {table} does not exist")))
    }
}
