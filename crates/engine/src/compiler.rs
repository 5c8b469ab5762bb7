use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use rowstage_core::{ChangeId, ChangeKind, CellValue, Row, RowAddress, SandboxChange, SessionId, TableRef};

use crate::dialect::{Dialect, DialectKind};
use crate::error::EngineError;
use crate::ledger::ChangeLedger;

/// Compiled, read-only form of a session's pending changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationScript {
    pub sql: String,
    pub statements: Vec<String>,
    pub warnings: Vec<String>,
    pub statement_count: usize,
    /// Changes the script covers, in statement order.
    pub change_ids: Vec<ChangeId>,
    /// Updates and deletes that locate their row by full-row equality.
    pub full_row_changes: Vec<ChangeId>,
    pub dialect: DialectKind,
    pub scope: Option<TableRef>,
    /// blake3 over the covered change ids, their revisions, the dialect and
    /// the SQL. Changes whenever any covered change does.
    pub fingerprint: String,
}

impl MigrationScript {
    pub fn is_empty(&self) -> bool {
        self.statement_count == 0
    }

    pub fn needs_full_row_acknowledgement(&self) -> bool {
        !self.full_row_changes.is_empty()
    }
}

/// Turns ledger changes into dialect-specific SQL. Never executes anything.
#[derive(Debug, Clone, Copy)]
pub struct MigrationCompiler {
    statement_warning_threshold: usize,
}

impl MigrationCompiler {
    pub fn new(statement_warning_threshold: usize) -> Self {
        Self {
            statement_warning_threshold,
        }
    }

    pub fn generate(
        &self,
        ledger: &ChangeLedger,
        session_id: &SessionId,
        dialect: DialectKind,
        scope: Option<&TableRef>,
    ) -> Result<MigrationScript, EngineError> {
        let changes = ledger.changes(session_id);
        let script = self.compile(&changes, dialect, scope, &ledger.key_column_map())?;
        debug!(
            session = %session_id,
            dialect = %dialect,
            statements = script.statement_count,
            warnings = script.warnings.len(),
            "migration compiled"
        );
        Ok(script)
    }

    /// Compile `changes` in order, keeping only `scope`'s table when given.
    pub fn compile(
        &self,
        changes: &[SandboxChange],
        dialect: DialectKind,
        scope: Option<&TableRef>,
        key_columns: &KeyColumnMap,
    ) -> Result<MigrationScript, EngineError> {
        let target = dialect.dialect();
        let included: Vec<&SandboxChange> = changes
            .iter()
            .filter(|change| scope.is_none_or(|table| &change.table == table))
            .collect();

        let mut statements = Vec::with_capacity(included.len());
        let mut warnings = Vec::new();
        let mut full_row_changes = Vec::new();

        for change in &included {
            let statement = match change.kind {
                ChangeKind::Insert => insert_statement(target, change, key_columns.get(&change.table))?,
                ChangeKind::Update => update_statement(target, change)?,
                ChangeKind::Delete => delete_statement(target, change)?,
            };
            statements.push(statement);

            if change.kind != ChangeKind::Insert && change.is_full_row_addressed() {
                full_row_changes.push(change.id);
                warnings.push(format!(
                    "{} on {} has no primary key and matches its row by every column; \
                     identical rows would all be affected",
                    change.kind.as_str(),
                    change.table.display_name()
                ));
            }
            if let Some(columns) = rewritten_key_columns(change) {
                warnings.push(format!(
                    "update on {} changes key column(s) {}",
                    change.table.display_name(),
                    columns.join(", ")
                ));
            }
        }

        warnings.extend(duplicate_insert_warnings(&included));
        if statements.len() > self.statement_warning_threshold {
            warnings.push(format!(
                "script has {} statements, above the review threshold of {}",
                statements.len(),
                self.statement_warning_threshold
            ));
        }

        let sql = if statements.is_empty() {
            String::new()
        } else {
            format!("{};", statements.join(";\n"))
        };
        let change_ids: Vec<ChangeId> = included.iter().map(|change| change.id).collect();

        Ok(MigrationScript {
            fingerprint: fingerprint(&included, dialect, &sql),
            statement_count: statements.len(),
            sql,
            statements,
            warnings,
            change_ids,
            full_row_changes,
            dialect,
            scope: scope.cloned(),
        })
    }
}

impl Default for MigrationCompiler {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_STATEMENT_WARNING_THRESHOLD)
    }
}

fn insert_statement(
    dialect: &dyn Dialect,
    change: &SandboxChange,
    key_columns: Option<&Vec<String>>,
) -> Result<String, EngineError> {
    let table = dialect.qualify_table(&change.table);
    let values = change.new_values.clone().unwrap_or_default();

    let mut statement = if values.is_empty() {
        match dialect.kind() {
            DialectKind::MySql => format!("INSERT INTO {table} () VALUES ()"),
            _ => format!("INSERT INTO {table} DEFAULT VALUES"),
        }
    } else {
        let columns: Vec<String> = values.keys().map(|column| dialect.quote_identifier(column)).collect();
        let literals = values
            .values()
            .map(|value| dialect.quote_literal(value))
            .collect::<Result<Vec<_>, _>>()?;
        format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            literals.join(", ")
        )
    };

    if change.is_full_row_addressed()
        && dialect.supports_returning()
        && let Some(key_columns) = key_columns.filter(|columns| !columns.is_empty())
    {
        let returning: Vec<String> = key_columns.iter().map(|column| dialect.quote_identifier(column)).collect();
        statement.push_str(&format!(" RETURNING {}", returning.join(", ")));
    }
    Ok(statement)
}

fn update_statement(dialect: &dyn Dialect, change: &SandboxChange) -> Result<String, EngineError> {
    let assignments = change
        .new_values
        .iter()
        .flatten()
        .map(|(column, value)| -> Result<String, EngineError> {
            Ok(format!("{} = {}", dialect.quote_identifier(column), dialect.quote_literal(value)?))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if assignments.is_empty() {
        return Err(EngineError::Core(rowstage_core::CoreError::InvalidChange(format!(
            "update {} on {} has no new values",
            change.id,
            change.table.display_name()
        ))));
    }
    Ok(format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.qualify_table(&change.table),
        assignments.join(", "),
        where_clause(dialect, change)?
    ))
}

fn delete_statement(dialect: &dyn Dialect, change: &SandboxChange) -> Result<String, EngineError> {
    Ok(format!(
        "DELETE FROM {} WHERE {}",
        dialect.qualify_table(&change.table),
        where_clause(dialect, change)?
    ))
}

fn where_clause(dialect: &dyn Dialect, change: &SandboxChange) -> Result<String, EngineError> {
    let columns: &Row = match change.address() {
        Some(RowAddress::Key(_)) => change.primary_key.as_ref().ok_or_else(|| missing_address(change))?,
        Some(RowAddress::FullRow(_)) => change.original_image().ok_or_else(|| missing_address(change))?,
        None => return Err(missing_address(change)),
    };
    let predicates = columns
        .iter()
        .map(|(column, value)| predicate(dialect, column, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(predicates.join(" AND "))
}

fn predicate(dialect: &dyn Dialect, column: &str, value: &CellValue) -> Result<String, EngineError> {
    let column = dialect.quote_identifier(column);
    if value.is_null() {
        return Ok(format!("{column} IS NULL"));
    }
    Ok(format!("{column} = {}", dialect.quote_literal(value)?))
}

fn missing_address(change: &SandboxChange) -> EngineError {
    EngineError::Addressing {
        table: change.table.display_name(),
        reason: format!("{} {} has neither a primary key nor old values", change.kind.as_str(), change.id),
    }
}

fn rewritten_key_columns(change: &SandboxChange) -> Option<Vec<String>> {
    if change.kind != ChangeKind::Update {
        return None;
    }
    let key = change.primary_key.as_ref()?;
    let new_values = change.new_values.as_ref()?;
    let columns: Vec<String> = key
        .iter()
        .filter(|(column, value)| new_values.get(*column).is_some_and(|new| new != *value))
        .map(|(column, _)| column.clone())
        .collect();
    (!columns.is_empty()).then_some(columns)
}

/// Key-less inserts of identical rows cannot be told apart once applied.
fn duplicate_insert_warnings(changes: &[&SandboxChange]) -> Vec<String> {
    let mut counts: Vec<((&TableRef, &Row), usize)> = Vec::new();
    for &change in changes {
        if change.kind != ChangeKind::Insert || !change.is_full_row_addressed() {
            continue;
        }
        let Some(values) = change.new_values.as_ref() else {
            continue;
        };
        match counts.iter_mut().find(|((table, row), _)| *table == &change.table && *row == values) {
            Some((_, count)) => *count += 1,
            None => counts.push(((&change.table, values), 1)),
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|((table, _), count)| {
            format!(
                "{count} identical inserts staged for {} without a key; they cannot be told apart",
                table.display_name()
            )
        })
        .collect()
}

/// Key columns per table, as the ledger currently knows them.
pub type KeyColumnMap = HashMap<TableRef, Vec<String>>;

fn fingerprint(changes: &[&SandboxChange], dialect: DialectKind, sql: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(dialect.as_str().as_bytes());
    for change in changes {
        hasher.update(change.id.as_bytes());
        hasher.update(&change.updated_at.wall_ms().to_le_bytes());
        hasher.update(&change.updated_at.counter().to_le_bytes());
    }
    hasher.update(sql.as_bytes());
    hasher.finalize().to_hex().to_string()
}
