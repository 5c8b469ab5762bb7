pub mod cell_value;
pub mod change;
pub mod error;
pub mod hlc;
pub mod ids;
pub mod row;

pub use cell_value::CellValue;
pub use change::{ChangeKind, RowEdit, SandboxChange};
pub use error::CoreError;
pub use hlc::Hlc;
pub use ids::*;
pub use row::{Namespace, Row, RowAddress, RowKey, TableRef, project_key};
