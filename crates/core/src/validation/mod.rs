//! Content-validation state and the export gate built on it.

mod gate;
mod sqlite;
mod store;
mod types;

pub use gate::{check_export_allowed, ExportBlocked};
pub use sqlite::SqliteValidationStore;
pub use store::{ValidationError, ValidationStore};
pub use types::ValidationRecord;
