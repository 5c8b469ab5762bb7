use rowstage_core::{ChangeId, CoreError, SessionId};
use rowstage_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The addressed row is already staged for deletion (or, for inserts,
    /// already staged at all).
    #[error("conflict on {table}: {reason}")]
    Conflict { table: String, reason: String },

    #[error("cannot address row in {table}: {reason}")]
    Addressing { table: String, reason: String },

    #[error("change not found: {0}")]
    ChangeNotFound(ChangeId),

    #[error("sandbox is not active for session {0}")]
    SessionInactive(SessionId),

    #[error("an apply is already in flight for session {0}")]
    ApplyInProgress(SessionId),

    #[error("migration script no longer matches the pending changes of session {0}")]
    StaleScript(SessionId),

    #[error("{dialect} cannot represent {kind} value: {reason}")]
    UnsupportedValue {
        dialect: &'static str,
        kind: &'static str,
        reason: String,
    },

    #[error("apply failed: {0}")]
    ApplyFailure(String),

    #[error("column metadata unavailable for {table}: {reason}")]
    Metadata { table: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}
