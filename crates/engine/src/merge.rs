//! Merge rules for staging a change next to the ones already pending.
//!
//! A session's change list holds at most one live change per row. A new
//! change either lands as a fresh entry or collapses into the entry that
//! already addresses its row:
//!
//! | pending | incoming | result                                         |
//! |---------|----------|------------------------------------------------|
//! | insert  | update   | insert with the new values merged in           |
//! | insert  | delete   | both disappear                                 |
//! | update  | update   | update, new values merged, original old values |
//! | update  | delete   | delete carrying the original old values        |
//! | delete  | any      | conflict                                       |
//! | any     | insert   | conflict (key-less inserts always append)      |

use serde::{Deserialize, Serialize};

use rowstage_core::{ChangeId, ChangeKind, Row, RowAddress, SandboxChange};

use crate::error::EngineError;

/// What `record` did with the incoming change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "change_id", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Added as a new entry.
    Appended(ChangeId),
    /// Folded into the pending change with this id.
    Merged(ChangeId),
    /// The pending update with this id became a delete.
    Replaced(ChangeId),
    /// The pending insert with this id was dropped together with the delete.
    Cancelled(ChangeId),
}

impl RecordOutcome {
    pub fn change_id(&self) -> ChangeId {
        match self {
            Self::Appended(id) | Self::Merged(id) | Self::Replaced(id) | Self::Cancelled(id) => *id,
        }
    }
}

/// Whether an edit addressed by `address` lands on the row `existing` owns.
pub fn targets(existing: &SandboxChange, address: &RowAddress) -> bool {
    if existing.reachable_addresses().contains(address) {
        return true;
    }
    match address {
        RowAddress::Key(_) if existing.is_full_row_addressed() => existing
            .current_image()
            .is_some_and(|image| address.matches_row(&image)),
        RowAddress::FullRow(image) if !existing.is_full_row_addressed() => existing
            .current_key()
            .is_some_and(|key| RowAddress::Key(key).matches_row(image)),
        _ => false,
    }
}

/// Stage `candidate` into `changes`, collapsing it into the change that
/// already owns its row.
pub fn merge_change(
    changes: &mut Vec<SandboxChange>,
    candidate: SandboxChange,
) -> Result<RecordOutcome, EngineError> {
    let Some(address) = candidate.address() else {
        return Err(EngineError::Addressing {
            table: candidate.table.display_name(),
            reason: format!("{} carries neither a primary key nor row values", candidate.kind.as_str()),
        });
    };

    if candidate.kind == ChangeKind::Insert {
        if !address.is_full_row()
            && changes
                .iter()
                .any(|existing| existing.table == candidate.table && targets(existing, &address))
        {
            return Err(EngineError::Conflict {
                table: candidate.table.display_name(),
                reason: "a change is already staged for this key".into(),
            });
        }
        let id = candidate.id;
        changes.push(candidate);
        return Ok(RecordOutcome::Appended(id));
    }

    let position = changes
        .iter()
        .position(|existing| existing.table == candidate.table && targets(existing, &address));
    let Some(index) = position else {
        let id = candidate.id;
        changes.push(candidate);
        return Ok(RecordOutcome::Appended(id));
    };

    let existing = &mut changes[index];
    match (existing.kind, candidate.kind) {
        (ChangeKind::Delete, _) => Err(EngineError::Conflict {
            table: candidate.table.display_name(),
            reason: "row is staged for deletion; undo the delete first".into(),
        }),
        (ChangeKind::Insert, ChangeKind::Delete) => {
            let removed = changes.remove(index);
            Ok(RecordOutcome::Cancelled(removed.id))
        }
        (ChangeKind::Insert, _) => {
            merge_values(&mut existing.new_values, candidate.new_values);
            existing.primary_key = existing.current_key();
            existing.updated_at = candidate.updated_at;
            Ok(RecordOutcome::Merged(existing.id))
        }
        (ChangeKind::Update, ChangeKind::Delete) => {
            fill_old_values(existing, candidate.old_values);
            existing.kind = ChangeKind::Delete;
            existing.new_values = None;
            existing.updated_at = candidate.updated_at;
            Ok(RecordOutcome::Replaced(existing.id))
        }
        (ChangeKind::Update, _) => {
            fill_old_values(existing, candidate.old_values);
            merge_values(&mut existing.new_values, candidate.new_values);
            existing.updated_at = candidate.updated_at;
            Ok(RecordOutcome::Merged(existing.id))
        }
    }
}

fn merge_values(target: &mut Option<Row>, incoming: Option<Row>) {
    let Some(incoming) = incoming else { return };
    target.get_or_insert_with(Row::new).extend(incoming);
}

/// Add pre-image columns the pending change never captured. Columns the
/// pending change already rewrote are skipped: the incoming pre-image only
/// knows their intermediate value.
fn fill_old_values(existing: &mut SandboxChange, incoming: Option<Row>) {
    let Some(incoming) = incoming else { return };
    let rewritten = existing.new_values.as_ref();
    let old = existing.old_values.get_or_insert_with(Row::new);
    for (column, value) in incoming {
        if old.contains_key(&column) || rewritten.is_some_and(|new| new.contains_key(&column)) {
            continue;
        }
        old.insert(column, value);
    }
}
