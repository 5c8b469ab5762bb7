mod sandbox;
mod service;

pub use sandbox::TestSandbox;
pub use service::ScriptedExecutionService;

use std::sync::Once;

use rowstage_core::{CellValue, Namespace, Row, RowKey, TableRef};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary. `RUST_LOG`
/// overrides the default `warn` filter.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .finish()
            .try_init();
    });
}

pub fn int(value: i64) -> CellValue {
    CellValue::Integer(value)
}

pub fn text(value: &str) -> CellValue {
    CellValue::Text(value.to_string())
}

pub fn row<const N: usize>(cells: [(&str, CellValue); N]) -> Row {
    cells
        .into_iter()
        .map(|(column, value)| (column.to_string(), value))
        .collect()
}

pub fn key<const N: usize>(cells: [(&str, CellValue); N]) -> RowKey {
    row(cells)
}

pub fn table(database: &str, name: &str) -> TableRef {
    TableRef::new(Namespace::new(database), name)
}

pub fn users() -> TableRef {
    table("app", "users")
}

pub fn orders() -> TableRef {
    table("app", "orders")
}
