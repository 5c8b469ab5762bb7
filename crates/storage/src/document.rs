//! The persisted form of one session's ledger.
//!
//! Stored as a JSON document under `<prefix>:ledger:<session id>`. Documents
//! carry a version and their own session id so a copied or outdated entry
//! is detected instead of silently loaded into the wrong session.

use serde::{Deserialize, Serialize};

use rowstage_core::{SandboxChange, SessionId};

use crate::error::StorageError;
use crate::traits::PreferenceStore;

pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub version: u32,
    pub session_id: SessionId,
    pub active: bool,
    pub changes: Vec<SandboxChange>,
}

impl PersistedSession {
    pub fn new(session_id: SessionId, active: bool, changes: Vec<SandboxChange>) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            session_id,
            active,
            changes,
        }
    }
}

pub fn session_key(prefix: &str, session_id: &SessionId) -> String {
    format!("{prefix}:ledger:{session_id}")
}

pub fn session_key_prefix(prefix: &str) -> String {
    format!("{prefix}:ledger:")
}

/// Decode a stored document, rejecting versions and session ids that do
/// not belong under `key`.
pub fn decode_session(key: &str, raw: &str, expected: &SessionId) -> Result<PersistedSession, StorageError> {
    let document: PersistedSession = serde_json::from_str(raw)?;
    if document.version != DOCUMENT_VERSION {
        return Err(StorageError::StaleDocument {
            key: key.to_string(),
            reason: format!("version {} (expected {DOCUMENT_VERSION})", document.version),
        });
    }
    if &document.session_id != expected {
        return Err(StorageError::StaleDocument {
            key: key.to_string(),
            reason: format!("belongs to session {}", document.session_id),
        });
    }
    Ok(document)
}

pub fn load_session(
    store: &dyn PreferenceStore,
    prefix: &str,
    session_id: &SessionId,
) -> Result<Option<PersistedSession>, StorageError> {
    let key = session_key(prefix, session_id);
    match store.get(&key)? {
        Some(raw) => decode_session(&key, &raw, session_id).map(Some),
        None => Ok(None),
    }
}

/// Write the document, or drop the entry entirely when the session holds
/// nothing worth recovering.
pub fn save_session(
    store: &dyn PreferenceStore,
    prefix: &str,
    document: &PersistedSession,
) -> Result<(), StorageError> {
    let key = session_key(prefix, &document.session_id);
    if !document.active && document.changes.is_empty() {
        return store.remove(&key);
    }
    let raw = serde_json::to_string(document)?;
    store.set(&key, &raw)
}

/// Session ids that currently have a persisted document.
pub fn stored_sessions(store: &dyn PreferenceStore, prefix: &str) -> Result<Vec<SessionId>, StorageError> {
    let key_prefix = session_key_prefix(prefix);
    Ok(store
        .keys_with_prefix(&key_prefix)?
        .into_iter()
        .filter_map(|key| key.strip_prefix(&key_prefix).map(SessionId::from))
        .collect())
}
