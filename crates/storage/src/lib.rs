pub mod document;
pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use document::{DOCUMENT_VERSION, PersistedSession};
pub use error::StorageError;
pub use memory::MemoryPreferenceStore;
pub use sqlite::SqlitePreferenceStore;
pub use traits::*;
