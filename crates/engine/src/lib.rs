pub mod apply;
pub mod compiler;
pub mod config;
pub mod dialect;
pub mod error;
pub mod execution;
pub mod keys;
pub mod ledger;
pub mod merge;
pub mod overlay;

pub use apply::{
    ApplyOrchestrator, ApplyOutcome, ApplyPhase, ApplyRequest, ApplySandboxResult, CONFIRMATION_TOKEN,
    ConfirmationReason, Environment,
};
pub use compiler::{KeyColumnMap, MigrationCompiler, MigrationScript};
pub use config::SandboxConfig;
pub use dialect::{Dialect, DialectKind};
pub use error::EngineError;
pub use execution::{ColumnMeta, ConnectionHandle, ExecutionError, ExecutionService};
pub use keys::KeyResolver;
pub use ledger::{ChangeLedger, LedgerEvent, LedgerEventKind, SandboxChangeGroup, Subscription};
pub use merge::RecordOutcome;
pub use overlay::{DeleteDisplay, DisplayRow, OverlayProjector, ProjectedPage, RowOrigin, RowState};

use std::sync::Arc;

use rowstage_core::{ChangeId, Row, RowEdit, RowKey, SandboxChange, SessionId, TableRef};
use rowstage_storage::{PreferenceStore, SqlitePreferenceStore};

/// Everything a working session needs, wired from one [`SandboxConfig`]:
/// ledger, overlay projection, migration compiler, key detection and the
/// apply orchestrator.
pub struct SandboxEngine {
    config: SandboxConfig,
    ledger: Arc<ChangeLedger>,
    projector: OverlayProjector,
    compiler: MigrationCompiler,
    keys: KeyResolver,
    orchestrator: ApplyOrchestrator,
}

impl SandboxEngine {
    pub fn new(
        config: SandboxConfig,
        store: Arc<dyn PreferenceStore>,
        service: Arc<dyn ExecutionService>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let ledger = Arc::new(ChangeLedger::new(store, config.storage_key_prefix.clone()));
        let compiler = MigrationCompiler::new(config.statement_warning_threshold);
        Ok(Self {
            projector: OverlayProjector::new(config.delete_display),
            keys: KeyResolver::new(ledger.clone(), service.clone()),
            orchestrator: ApplyOrchestrator::new(ledger.clone(), service, compiler),
            compiler,
            ledger,
            config,
        })
    }

    /// Engine persisting its ledgers to a SQLite file at `path`.
    pub fn open(
        config: SandboxConfig,
        path: &str,
        service: Arc<dyn ExecutionService>,
    ) -> Result<Self, EngineError> {
        let store = SqlitePreferenceStore::open(path)?;
        Self::new(config, Arc::new(store), service)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<ChangeLedger> {
        &self.ledger
    }

    // ========================================================================
    // Change Ledger
    // ========================================================================

    pub fn activate(&self, session_id: &SessionId) -> Result<(), EngineError> {
        self.ledger.activate(session_id)
    }

    pub fn deactivate(&self, session_id: &SessionId, discard: bool) -> Result<(), EngineError> {
        self.ledger.deactivate(session_id, discard)
    }

    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.ledger.is_active(session_id)
    }

    pub fn record(&self, session_id: &SessionId, edit: RowEdit) -> Result<RecordOutcome, EngineError> {
        self.ledger.record(session_id, edit)
    }

    pub fn remove(&self, session_id: &SessionId, change_id: ChangeId) -> Result<SandboxChange, EngineError> {
        self.ledger.remove(session_id, change_id)
    }

    pub fn clear_all(&self, session_id: &SessionId) -> Result<usize, EngineError> {
        self.ledger.clear_all(session_id)
    }

    pub fn clear_table(&self, session_id: &SessionId, table: &TableRef) -> Result<usize, EngineError> {
        self.ledger.clear_table(session_id, table)
    }

    pub fn list_grouped(&self, session_id: &SessionId) -> Vec<SandboxChangeGroup> {
        self.ledger.list_grouped(session_id)
    }

    pub fn changes(&self, session_id: &SessionId) -> Vec<SandboxChange> {
        self.ledger.changes(session_id)
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LedgerEvent) + Send + Sync + 'static,
    {
        self.ledger.subscribe(listener)
    }

    pub fn set_key_columns(&self, table: TableRef, columns: Vec<String>) {
        self.ledger.set_key_columns(table, columns)
    }

    pub fn assign_primary_key(
        &self,
        session_id: &SessionId,
        change_id: ChangeId,
        key: RowKey,
    ) -> Result<(), EngineError> {
        self.ledger.assign_primary_key(session_id, change_id, key)
    }

    // ========================================================================
    // Overlay Projector
    // ========================================================================

    pub fn project(&self, session_id: &SessionId, table: &TableRef, fetched: &[Row]) -> ProjectedPage {
        self.projector.project(&self.ledger, session_id, table, fetched)
    }

    // ========================================================================
    // Migration Compiler
    // ========================================================================

    pub fn generate(
        &self,
        session_id: &SessionId,
        dialect: DialectKind,
        scope: Option<&TableRef>,
    ) -> Result<MigrationScript, EngineError> {
        self.compiler.generate(&self.ledger, session_id, dialect, scope)
    }

    // ========================================================================
    // Keys and Apply
    // ========================================================================

    pub async fn detect_keys(
        &self,
        handle: &ConnectionHandle,
        table: &TableRef,
    ) -> Result<Option<Vec<String>>, EngineError> {
        self.keys.detect(handle, table).await
    }

    pub async fn apply(&self, request: &ApplyRequest, script: &MigrationScript) -> Result<ApplyOutcome, EngineError> {
        self.orchestrator.apply(request, script).await
    }

    pub fn phase(&self, session_id: &SessionId) -> ApplyPhase {
        self.orchestrator.phase(session_id)
    }

    pub fn is_applying(&self, session_id: &SessionId) -> bool {
        self.orchestrator.is_applying(session_id)
    }
}
