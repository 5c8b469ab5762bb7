use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::overlay::DeleteDisplay;

pub const DEFAULT_STATEMENT_WARNING_THRESHOLD: usize = 500;
pub const DEFAULT_STORAGE_KEY_PREFIX: &str = "sandbox";

/// Engine settings. Every field has a default, so an empty TOML document
/// is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// How staged deletes show up in projected pages.
    pub delete_display: DeleteDisplay,
    /// Scripts with more statements than this carry a warning.
    pub statement_warning_threshold: usize,
    /// Namespace for ledger documents in the preference store.
    pub storage_key_prefix: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            delete_display: DeleteDisplay::default(),
            statement_warning_threshold: DEFAULT_STATEMENT_WARNING_THRESHOLD,
            storage_key_prefix: DEFAULT_STORAGE_KEY_PREFIX.to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, EngineError> {
        let config: SandboxConfig =
            toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.statement_warning_threshold == 0 {
            return Err(EngineError::Config(
                "statement_warning_threshold must be at least 1".into(),
            ));
        }
        if self.storage_key_prefix.is_empty() || self.storage_key_prefix.contains(':') {
            return Err(EngineError::Config(format!(
                "storage_key_prefix must be non-empty and contain no ':' (got {:?})",
                self.storage_key_prefix
            )));
        }
        Ok(())
    }
}
