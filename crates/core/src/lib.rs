pub mod audit;
pub mod config;
pub mod export;
pub mod external;
pub mod graph;
pub mod manual_fix;
pub mod metrics;
pub mod testing;
pub mod ticket;
pub mod validation;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditHandle, AuditPage, AuditQuery,
    AuditRecord, AuditStore, AuditWriter, SqliteAuditStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, ExportConfig,
    JiraConfig, SanitizedConfig,
};
pub use export::{
    BroadcastProgressSink, ExportError, ExportOrchestrator, ExportStatus, ExportSummary,
    ExportTaskState, ExportTaskStore, ProgressSink, ProgressUpdate, SqliteExportTaskStore,
};
pub use external::{CreatedTicket, ExternalError, ExternalTicketClient, JiraClient};
pub use graph::{CycleError, DependencyGraph, EdgeRejection};
pub use manual_fix::{FixType, ManualFixEntry, ManualFixRegistry, SqliteManualFixStore};
pub use ticket::{DependencyEdge, SqliteTicketStore, TicketError, TicketNode, TicketStore};
pub use validation::{SqliteValidationStore, ValidationRecord, ValidationStore};
