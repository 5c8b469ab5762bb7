use std::sync::Arc;

use tracing::{debug, warn};

use rowstage_core::TableRef;

use crate::error::EngineError;
use crate::execution::{ColumnMeta, ConnectionHandle, ExecutionService};
use crate::ledger::ChangeLedger;

/// Works out which columns identify a row of a table and registers them
/// with the ledger.
pub struct KeyResolver {
    ledger: Arc<ChangeLedger>,
    service: Arc<dyn ExecutionService>,
}

impl KeyResolver {
    pub fn new(ledger: Arc<ChangeLedger>, service: Arc<dyn ExecutionService>) -> Self {
        Self { ledger, service }
    }

    /// Fetch column metadata and register the table's key. `None` means the
    /// table has no usable key and edits fall back to full-row matching.
    pub async fn detect(
        &self,
        handle: &ConnectionHandle,
        table: &TableRef,
    ) -> Result<Option<Vec<String>>, EngineError> {
        let columns = self
            .service
            .fetch_columns(handle, table)
            .await
            .map_err(|e| EngineError::Metadata {
                table: table.display_name(),
                reason: e.to_string(),
            })?;

        let key = choose_key_columns(&columns);
        match &key {
            Some(key) => {
                debug!(table = %table, ?key, "key columns detected");
                self.ledger.set_key_columns(table.clone(), key.clone());
            }
            None => warn!(table = %table, "no primary key or unique column; rows will match by full row"),
        }
        Ok(key)
    }
}

/// Primary-key columns in key order; otherwise the first non-null unique
/// column.
pub fn choose_key_columns(columns: &[ColumnMeta]) -> Option<Vec<String>> {
    let mut primary: Vec<(u32, &str)> = columns
        .iter()
        .filter_map(|column| column.primary_key_position.map(|pos| (pos, column.name.as_str())))
        .collect();
    if !primary.is_empty() {
        primary.sort_by_key(|(pos, _)| *pos);
        return Some(primary.into_iter().map(|(_, name)| name.to_string()).collect());
    }
    columns
        .iter()
        .find(|column| column.unique && !column.nullable)
        .map(|column| vec![column.name.clone()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_primary_key_keeps_key_order() {
        let columns = vec![
            ColumnMeta::new("line", "int").primary_key(2),
            ColumnMeta::new("note", "text"),
            ColumnMeta::new("order_id", "int").primary_key(1),
        ];
        assert_eq!(
            choose_key_columns(&columns),
            Some(vec!["order_id".to_string(), "line".to_string()])
        );
    }

    #[test]
    fn unique_column_is_the_fallback() {
        let columns = vec![
            ColumnMeta::new("nickname", "text").unique(),
            ColumnMeta::new("email", "text").unique().not_null(),
        ];
        assert_eq!(choose_key_columns(&columns), Some(vec!["email".to_string()]));
        assert_eq!(choose_key_columns(&[ColumnMeta::new("a", "text")]), None);
    }
}
