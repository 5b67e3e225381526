//! Export of ticket sets into the external tracker.
//!
//! The orchestrator gates on validation, orders tickets by dependency,
//! creates them one at a time and records partial failures as manual fixes.

mod error;
mod orchestrator;
mod pacer;
mod progress;
mod sink;
mod task_store;
mod types;

pub use error::ExportError;
pub use orchestrator::ExportOrchestrator;
pub use pacer::CallPacer;
pub use progress::{ExportProgressTracker, ResumePoint};
pub use sink::{
    BroadcastProgressSink, ProgressSink, ProgressUpdate, SinkError, TracingProgressSink,
};
pub use task_store::{ExportTaskError, ExportTaskStore, SqliteExportTaskStore};
pub use types::*;
