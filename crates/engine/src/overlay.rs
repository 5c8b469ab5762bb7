use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use rowstage_core::{ChangeId, ChangeKind, Row, RowAddress, SandboxChange, SessionId, TableRef};

use crate::ledger::ChangeLedger;

/// How rows staged for deletion are shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteDisplay {
    /// Kept inline, rendered struck through.
    #[default]
    Strikethrough,
    /// Left out of the list; still reachable through `ProjectedPage::hidden`.
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    Clean,
    Updated,
    PendingDelete,
    Inserted,
}

impl RowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Updated => "updated",
            Self::PendingDelete => "pending_delete",
            Self::Inserted => "inserted",
        }
    }
}

/// Where a display row came from. Indices point into the fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", content = "index", rename_all = "snake_case")]
pub enum RowOrigin {
    Fetched(usize),
    /// A staged insert with no fetched counterpart.
    Synthetic,
    /// A staged insert whose key showed up in the fetched page.
    MatchedInsert(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayRow {
    pub values: Row,
    pub state: RowState,
    pub origin: RowOrigin,
    pub change_id: Option<ChangeId>,
    /// Columns showing a staged value rather than the fetched one.
    pub pending_columns: BTreeSet<String>,
}

impl DisplayRow {
    fn clean(index: usize, values: Row) -> Self {
        Self {
            values,
            state: RowState::Clean,
            origin: RowOrigin::Fetched(index),
            change_id: None,
            pending_columns: BTreeSet::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state != RowState::Clean
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectedPage {
    pub rows: Vec<DisplayRow>,
    /// Pending deletes left out under [`DeleteDisplay::Hidden`].
    pub hidden: Vec<DisplayRow>,
}

impl ProjectedPage {
    pub fn pending_count(&self) -> usize {
        self.rows.iter().filter(|row| row.is_pending()).count() + self.hidden.len()
    }

    pub fn find(&self, change_id: ChangeId) -> Option<&DisplayRow> {
        self.rows
            .iter()
            .chain(self.hidden.iter())
            .find(|row| row.change_id == Some(change_id))
    }
}

/// Merges staged changes onto freshly fetched rows for display. Never
/// touches the ledger or the fetched page.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayProjector {
    delete_display: DeleteDisplay,
}

impl OverlayProjector {
    pub fn new(delete_display: DeleteDisplay) -> Self {
        Self { delete_display }
    }

    pub fn delete_display(&self) -> DeleteDisplay {
        self.delete_display
    }

    pub fn project(
        &self,
        ledger: &ChangeLedger,
        session_id: &SessionId,
        table: &TableRef,
        fetched: &[Row],
    ) -> ProjectedPage {
        if !ledger.is_active(session_id) {
            return ProjectedPage {
                rows: fetched
                    .iter()
                    .enumerate()
                    .map(|(index, row)| DisplayRow::clean(index, row.clone()))
                    .collect(),
                hidden: Vec::new(),
            };
        }
        self.project_changes(&ledger.changes_for_table(session_id, table), fetched)
    }

    /// Project `changes` (all of one table, in ledger order) onto `fetched`.
    pub fn project_changes(&self, changes: &[SandboxChange], fetched: &[Row]) -> ProjectedPage {
        let mut claimed = vec![false; changes.len()];
        let mut page = ProjectedPage::default();

        for (index, row) in fetched.iter().enumerate() {
            let matched = changes
                .iter()
                .enumerate()
                .find(|(i, change)| !claimed[*i] && fetched_row_matches(change, row));
            let Some((i, change)) = matched else {
                page.rows.push(DisplayRow::clean(index, row.clone()));
                continue;
            };
            claimed[i] = true;

            let display = match change.kind {
                ChangeKind::Update => overlaid(row, change, RowState::Updated, RowOrigin::Fetched(index)),
                ChangeKind::Insert => {
                    overlaid(row, change, RowState::Inserted, RowOrigin::MatchedInsert(index))
                }
                ChangeKind::Delete => DisplayRow {
                    values: row.clone(),
                    state: RowState::PendingDelete,
                    origin: RowOrigin::Fetched(index),
                    change_id: Some(change.id),
                    pending_columns: BTreeSet::new(),
                },
            };
            if display.state == RowState::PendingDelete && self.delete_display == DeleteDisplay::Hidden {
                page.hidden.push(display);
            } else {
                page.rows.push(display);
            }
        }

        for (i, change) in changes.iter().enumerate() {
            if claimed[i] || change.kind != ChangeKind::Insert {
                continue;
            }
            let values = change.new_values.clone().unwrap_or_default();
            page.rows.push(DisplayRow {
                pending_columns: values.keys().cloned().collect(),
                values,
                state: RowState::Inserted,
                origin: RowOrigin::Synthetic,
                change_id: Some(change.id),
            });
        }
        page
    }
}

/// Updates and deletes match by key or by their captured pre-image.
/// Inserts only reconcile once they carry a key; a key-less insert that
/// equals an existing row is still a new row.
fn fetched_row_matches(change: &SandboxChange, row: &Row) -> bool {
    match &change.primary_key {
        Some(key) if !key.is_empty() => RowAddress::Key(key.clone()).matches_row(row),
        _ if change.kind == ChangeKind::Insert => false,
        _ => change.address().is_some_and(|address| address.matches_row(row)),
    }
}

fn overlaid(row: &Row, change: &SandboxChange, state: RowState, origin: RowOrigin) -> DisplayRow {
    let mut values = row.clone();
    let mut pending_columns = BTreeSet::new();
    if let Some(new_values) = &change.new_values {
        for (column, value) in new_values {
            pending_columns.insert(column.clone());
            values.insert(column.clone(), value.clone());
        }
    }
    DisplayRow {
        values,
        state,
        origin,
        change_id: Some(change.id),
        pending_columns,
    }
}
