use std::path::Path;
use std::sync::Arc;

use rowstage_core::{Row, RowEdit, RowKey, SessionId, TableRef};
use rowstage_engine::{
    ApplyOutcome, ApplyRequest, ConnectionHandle, DialectKind, EngineError, Environment, MigrationScript,
    RecordOutcome, SandboxConfig, SandboxEngine,
};
use rowstage_storage::{MemoryPreferenceStore, PreferenceStore};

use crate::ScriptedExecutionService;

/// One working session against a scripted database.
pub struct TestSandbox {
    pub engine: SandboxEngine,
    pub service: Arc<ScriptedExecutionService>,
    pub session: SessionId,
    pub connection: ConnectionHandle,
}

impl TestSandbox {
    /// Activated session backed by an in-memory store.
    pub fn new() -> Result<Self, EngineError> {
        Self::with_store(SandboxConfig::default(), Arc::new(MemoryPreferenceStore::new()))
    }

    pub fn with_config(config: SandboxConfig) -> Result<Self, EngineError> {
        Self::with_store(config, Arc::new(MemoryPreferenceStore::new()))
    }

    pub fn with_store(config: SandboxConfig, store: Arc<dyn PreferenceStore>) -> Result<Self, EngineError> {
        crate::init_tracing();
        let service = Arc::new(ScriptedExecutionService::new());
        let engine = SandboxEngine::new(config, store, service.clone())?;
        let session = SessionId::new("session-1");
        engine.activate(&session)?;
        Ok(Self {
            engine,
            service,
            session,
            connection: ConnectionHandle::new("conn-1"),
        })
    }

    /// Session persisted to a SQLite file. Does not activate: a reopened
    /// file must come back with whatever state it was saved in.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        crate::init_tracing();
        let service = Arc::new(ScriptedExecutionService::new());
        let path = path.to_string_lossy();
        let engine = SandboxEngine::open(SandboxConfig::default(), &path, service.clone())?;
        Ok(Self {
            engine,
            service,
            session: SessionId::new("session-1"),
            connection: ConnectionHandle::new("conn-1"),
        })
    }

    pub fn insert(&self, table: TableRef, values: Row) -> Result<RecordOutcome, EngineError> {
        self.engine.record(&self.session, RowEdit::insert(table, values))
    }

    pub fn update(
        &self,
        table: TableRef,
        key: Option<RowKey>,
        old_values: Row,
        new_values: Row,
    ) -> Result<RecordOutcome, EngineError> {
        self.engine
            .record(&self.session, RowEdit::update(table, key, old_values, new_values))
    }

    pub fn delete(&self, table: TableRef, key: Option<RowKey>, old_values: Row) -> Result<RecordOutcome, EngineError> {
        self.engine
            .record(&self.session, RowEdit::delete(table, key, old_values))
    }

    pub fn script(&self, scope: Option<&TableRef>) -> Result<MigrationScript, EngineError> {
        self.engine.generate(&self.session, DialectKind::Postgres, scope)
    }

    pub fn request(&self, environment: Environment) -> ApplyRequest {
        ApplyRequest::new(self.session.clone(), self.connection.clone(), environment)
    }

    /// Generate for the whole session and apply in development.
    pub async fn apply_all(&self) -> Result<ApplyOutcome, EngineError> {
        let script = self.script(None)?;
        self.engine
            .apply(&self.request(Environment::Development), &script)
            .await
    }
}
