use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cell_value::CellValue;

/// Column name to value. Ordered so every derived artifact (SQL, digests,
/// persisted documents) is deterministic.
pub type Row = BTreeMap<String, CellValue>;

/// Key-column name to value, addressing one row of a table.
pub type RowKey = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl Namespace {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: None,
        }
    }

    pub fn with_schema(database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: Some(schema.into()),
        }
    }
}

/// The relation a change targets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub namespace: Namespace,
    pub table: String,
}

impl TableRef {
    pub fn new(namespace: Namespace, table: impl Into<String>) -> Self {
        Self {
            namespace,
            table: table.into(),
        }
    }

    pub fn display_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace.schema {
            Some(schema) => write!(f, "{}.{}.{}", self.namespace.database, schema, self.table),
            None => write!(f, "{}.{}", self.namespace.database, self.table),
        }
    }
}

/// How a staged change locates its row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "columns", rename_all = "snake_case")]
pub enum RowAddress {
    Key(RowKey),
    /// No usable key: the row is identified by equality on every column
    /// of the image.
    FullRow(Row),
}

impl RowAddress {
    pub fn is_full_row(&self) -> bool {
        matches!(self, RowAddress::FullRow(_))
    }

    /// Whether `row` is the row this address points at. Key addresses need
    /// every key column present and equal; full-row addresses need every
    /// column of the image present and equal.
    pub fn matches_row(&self, row: &Row) -> bool {
        let columns = match self {
            RowAddress::Key(key) => key,
            RowAddress::FullRow(image) => image,
        };
        !columns.is_empty()
            && columns
                .iter()
                .all(|(column, value)| row.get(column) == Some(value))
    }
}

/// Extract the values of `key_columns` from `row`, if all are present.
pub fn project_key(row: &Row, key_columns: &[String]) -> Option<RowKey> {
    if key_columns.is_empty() {
        return None;
    }
    key_columns
        .iter()
        .map(|column| row.get(column).map(|value| (column.clone(), value.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, CellValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn table_display_includes_schema_when_present() {
        let plain = TableRef::new(Namespace::new("shop"), "users");
        let scoped = TableRef::new(Namespace::with_schema("shop", "public"), "users");
        assert_eq!(plain.display_name(), "shop.users");
        assert_eq!(scoped.display_name(), "shop.public.users");
    }

    #[test]
    fn key_address_ignores_non_key_columns() {
        let address = RowAddress::Key(row(&[("id", CellValue::Integer(5))]));
        let fetched = row(&[("id", CellValue::Integer(5)), ("name", "x".into())]);
        assert!(address.matches_row(&fetched));
        assert!(!address.matches_row(&row(&[("id", CellValue::Integer(6))])));
    }

    #[test]
    fn project_key_requires_every_column() {
        let full = row(&[("a", 1i64.into()), ("b", 2i64.into())]);
        let cols = vec!["a".to_string(), "b".to_string()];
        assert_eq!(project_key(&full, &cols), Some(full.clone()));
        assert_eq!(project_key(&row(&[("a", 1i64.into())]), &cols), None);
        assert_eq!(project_key(&full, &[]), None);
    }
}
