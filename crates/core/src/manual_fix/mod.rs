//! Append-only registry of follow-ups that partial export failures leave behind.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteManualFixStore;
pub use store::{ManualFixError, ManualFixRegistry, ManualFixStore};
pub use types::{FixType, ManualFixEntry, NewManualFix};
