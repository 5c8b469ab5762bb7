//! Port to the query-execution layer. The engine never opens connections;
//! it is handed an opaque handle and calls back through this trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rowstage_core::TableRef;

/// Opaque reference to a live connection, issued by the session layer.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionHandle(String);

impl ConnectionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionHandle({})", self.0)
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Column metadata as reported by the target database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    /// 1-based position within the primary key, if part of it.
    #[serde(default)]
    pub primary_key_position: Option<u32>,
    /// Covered by a single-column unique constraint.
    #[serde(default)]
    pub unique: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            primary_key_position: None,
            unique: false,
        }
    }

    pub fn primary_key(mut self, position: u32) -> Self {
        self.primary_key_position = Some(position);
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Rejected by the database. The message is the driver's, untouched.
    #[error("{message}")]
    Database {
        message: String,
        statement_index: Option<usize>,
    },

    #[error("connection lost: {0}")]
    Connection(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl ExecutionError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            statement_index: None,
        }
    }

    /// The driver's own text, without the variant prefix `Display` adds.
    pub fn message(&self) -> &str {
        match self {
            Self::Database { message, .. } => message,
            Self::Connection(message) | Self::Timeout(message) => message,
        }
    }
}

#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Run every statement in one transaction. Either all commit and the
    /// number of executed statements comes back, or nothing does.
    async fn execute_transaction(
        &self,
        handle: &ConnectionHandle,
        statements: &[String],
    ) -> Result<usize, ExecutionError>;

    async fn fetch_columns(
        &self,
        handle: &ConnectionHandle,
        table: &TableRef,
    ) -> Result<Vec<ColumnMeta>, ExecutionError>;
}
