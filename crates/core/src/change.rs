use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hlc::Hlc;
use crate::ids::ChangeId;
use crate::row::{Row, RowAddress, RowKey, TableRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// One staged row mutation. The ledger holds at most one live change per
/// addressed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxChange {
    pub id: ChangeId,
    pub kind: ChangeKind,
    pub table: TableRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<RowKey>,
    /// Pre-image; absent for inserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_values: Option<Row>,
    /// Absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_values: Option<Row>,
    /// Creation time. Never changes across merges.
    pub timestamp: Hlc,
    /// Time of the latest merge into this change.
    pub updated_at: Hlc,
}

impl SandboxChange {
    /// The image a full-row address is built from before any merge: the
    /// inserted values, or the captured pre-image.
    pub fn original_image(&self) -> Option<&Row> {
        match self.kind {
            ChangeKind::Insert => self.new_values.as_ref(),
            ChangeKind::Update | ChangeKind::Delete => self.old_values.as_ref(),
        }
    }

    /// The row as it looks with this change applied (deletes keep their
    /// pre-image so the row stays identifiable for undo).
    pub fn current_image(&self) -> Option<Row> {
        match self.kind {
            ChangeKind::Insert => self.new_values.clone(),
            ChangeKind::Delete => self.old_values.clone(),
            ChangeKind::Update => {
                let mut image = self.old_values.clone().unwrap_or_default();
                if let Some(new_values) = &self.new_values {
                    image.extend(new_values.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Some(image)
            }
        }
    }

    /// Primary address of the change: its key, or the original image.
    pub fn address(&self) -> Option<RowAddress> {
        match &self.primary_key {
            Some(key) if !key.is_empty() => Some(RowAddress::Key(key.clone())),
            _ => self
                .original_image()
                .filter(|image| !image.is_empty())
                .map(|image| RowAddress::FullRow(image.clone())),
        }
    }

    /// The key the row carries once this change lands: the primary key with
    /// any rewritten key columns taken from the new values.
    pub fn current_key(&self) -> Option<RowKey> {
        let key = self.primary_key.as_ref().filter(|key| !key.is_empty())?;
        let Some(new_values) = &self.new_values else {
            return Some(key.clone());
        };
        Some(
            key.iter()
                .map(|(column, value)| {
                    let value = new_values.get(column).unwrap_or(value);
                    (column.clone(), value.clone())
                })
                .collect(),
        )
    }

    /// Every address an incoming edit may use to reach this change. Key
    /// addressed changes answer to their original and current key;
    /// full-row changes answer to both the original and the current image,
    /// since the UI addresses follow-up edits by what it displays.
    pub fn reachable_addresses(&self) -> Vec<RowAddress> {
        let Some(primary) = self.address() else {
            return Vec::new();
        };
        let current = if primary.is_full_row() {
            self.current_image()
                .filter(|image| !image.is_empty())
                .map(RowAddress::FullRow)
        } else {
            self.current_key().map(RowAddress::Key)
        };
        let mut addresses = vec![primary];
        if let Some(current) = current
            && !addresses.contains(&current)
        {
            addresses.push(current);
        }
        addresses
    }

    pub fn is_full_row_addressed(&self) -> bool {
        self.primary_key.as_ref().is_none_or(|key| key.is_empty())
    }
}

/// An edit event coming from the table view, before the ledger turns it
/// into a [`SandboxChange`].
#[derive(Debug, Clone, PartialEq)]
pub enum RowEdit {
    Insert {
        table: TableRef,
        values: Row,
        primary_key: Option<RowKey>,
    },
    Update {
        table: TableRef,
        primary_key: Option<RowKey>,
        old_values: Row,
        new_values: Row,
    },
    Delete {
        table: TableRef,
        primary_key: Option<RowKey>,
        old_values: Row,
    },
}

impl RowEdit {
    pub fn insert(table: TableRef, values: Row) -> Self {
        Self::Insert {
            table,
            values,
            primary_key: None,
        }
    }

    pub fn update(table: TableRef, primary_key: Option<RowKey>, old_values: Row, new_values: Row) -> Self {
        Self::Update {
            table,
            primary_key,
            old_values,
            new_values,
        }
    }

    pub fn delete(table: TableRef, primary_key: Option<RowKey>, old_values: Row) -> Self {
        Self::Delete {
            table,
            primary_key,
            old_values,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Insert { .. } => ChangeKind::Insert,
            Self::Update { .. } => ChangeKind::Update,
            Self::Delete { .. } => ChangeKind::Delete,
        }
    }

    pub fn table(&self) -> &TableRef {
        match self {
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => table,
        }
    }

    pub fn primary_key(&self) -> Option<&RowKey> {
        match self {
            Self::Insert { primary_key, .. }
            | Self::Update { primary_key, .. }
            | Self::Delete { primary_key, .. } => primary_key.as_ref(),
        }
    }

    /// Reject edits that carry nothing to stage.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::Insert { values, .. } if values.is_empty() => {
                Err(CoreError::InvalidChange("insert without values".into()))
            }
            Self::Update { new_values, .. } if new_values.is_empty() => {
                Err(CoreError::InvalidChange("update without new values".into()))
            }
            _ => Ok(()),
        }
    }

    pub fn into_change(self, id: ChangeId, at: Hlc) -> SandboxChange {
        let (kind, table, primary_key, old_values, new_values) = match self {
            Self::Insert {
                table,
                values,
                primary_key,
            } => (ChangeKind::Insert, table, primary_key, None, Some(values)),
            Self::Update {
                table,
                primary_key,
                old_values,
                new_values,
            } => (ChangeKind::Update, table, primary_key, Some(old_values), Some(new_values)),
            Self::Delete {
                table,
                primary_key,
                old_values,
            } => (ChangeKind::Delete, table, primary_key, Some(old_values), None),
        };
        SandboxChange {
            id,
            kind,
            table,
            primary_key: primary_key.filter(|key| !key.is_empty()),
            old_values,
            new_values,
            timestamp: at,
            updated_at: at,
        }
    }
}
