// Record History - Core Library
// Append-only change history for relational records: derived history
// schemas, change detection, point-in-time snapshots and field diffs.

pub mod catalog;
pub mod config;
pub mod detector;
pub mod diff;
pub mod error;
pub mod projector;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod value;

// Re-export commonly used types
pub use catalog::{installed_tables, load_installed, SchemaCatalog};
pub use config::HistoryConfig;
pub use detector::{Change, HistoricalRecords, SaveEvent};
pub use diff::{changelog, compare, modified_fields, FieldChange};
pub use error::{HistoryError, Result};
pub use projector::{project, FieldRule, HistoricalSchema, HistoryOptions};
pub use schema::{FieldDescriptor, FieldKind, RecordSchema, ReverseAccessor};
pub use snapshot::{reconstruct, table_as_of, TableSnapshot};
pub use store::{EditorId, HistoricalEntry, HistoryManager, HistoryType};
pub use value::{FieldValue, Record, Trackable};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
