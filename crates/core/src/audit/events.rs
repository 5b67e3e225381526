use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Dependency editing
    DependencyAdded {
        ticket_set_id: String,
        /// Ticket that depends on `to`
        from: String,
        to: String,
    },
    DependencyRejected {
        ticket_set_id: String,
        from: String,
        to: String,
        /// Human-readable rejection reason
        reason: String,
    },
    DependencyRemoved {
        ticket_set_id: String,
        from: String,
        to: String,
    },

    // Export lifecycle
    ExportStarted {
        ticket_set_id: String,
        task_id: String,
        /// 1-based attempt number within the run record's budget
        attempt: u32,
        total_tickets: usize,
        /// Tickets skipped because they already carry an external key
        already_exported: usize,
    },
    /// Export refused by the validation gate or ordering.
    ExportBlocked {
        ticket_set_id: String,
        reason: String,
    },
    TicketExported {
        ticket_set_id: String,
        ticket_id: String,
        external_key: String,
        external_url: String,
        /// Whether the body was truncated in favour of an attachment
        #[serde(default)]
        truncated: bool,
    },
    ManualFixRecorded {
        ticket_set_id: String,
        ticket_id: String,
        fix_type: String,
        external_key: String,
        error: String,
    },
    ExportCompleted {
        ticket_set_id: String,
        task_id: String,
        created: usize,
        skipped: usize,
        manual_fixes: usize,
        duration_ms: u64,
    },
    ExportFailed {
        ticket_set_id: String,
        task_id: String,
        error: String,
        category: String,
        retry_count: u32,
        /// Whether another attempt will follow automatically
        will_retry: bool,
    },
    ExportCancelled {
        ticket_set_id: String,
        task_id: String,
        /// Tickets with an external key at the moment of cancellation
        exported: usize,
    },
    /// A run left `running` by a previous process was closed out at startup.
    ExportInterrupted {
        ticket_set_id: String,
        task_id: String,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::DependencyAdded { .. } => "dependency_added",
            Self::DependencyRejected { .. } => "dependency_rejected",
            Self::DependencyRemoved { .. } => "dependency_removed",
            Self::ExportStarted { .. } => "export_started",
            Self::ExportBlocked { .. } => "export_blocked",
            Self::TicketExported { .. } => "ticket_exported",
            Self::ManualFixRecorded { .. } => "manual_fix_recorded",
            Self::ExportCompleted { .. } => "export_completed",
            Self::ExportFailed { .. } => "export_failed",
            Self::ExportCancelled { .. } => "export_cancelled",
            Self::ExportInterrupted { .. } => "export_interrupted",
        }
    }

    /// Extract ticket_set_id for set-scoped events
    pub fn ticket_set_id(&self) -> Option<&str> {
        match self {
            Self::ServiceStarted { .. } | Self::ServiceStopped { .. } => None,
            Self::DependencyAdded { ticket_set_id, .. }
            | Self::DependencyRejected { ticket_set_id, .. }
            | Self::DependencyRemoved { ticket_set_id, .. }
            | Self::ExportStarted { ticket_set_id, .. }
            | Self::ExportBlocked { ticket_set_id, .. }
            | Self::TicketExported { ticket_set_id, .. }
            | Self::ManualFixRecorded { ticket_set_id, .. }
            | Self::ExportCompleted { ticket_set_id, .. }
            | Self::ExportFailed { ticket_set_id, .. }
            | Self::ExportCancelled { ticket_set_id, .. }
            | Self::ExportInterrupted { ticket_set_id, .. } => Some(ticket_set_id),
        }
    }

    /// Extract ticket_id if this event concerns a single ticket
    pub fn ticket_id(&self) -> Option<&str> {
        match self {
            Self::TicketExported { ticket_id, .. } | Self::ManualFixRecorded { ticket_id, .. } => {
                Some(ticket_id)
            }
            Self::DependencyAdded { from, .. }
            | Self::DependencyRejected { from, .. }
            | Self::DependencyRemoved { from, .. } => Some(from),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub ticket_set_id: Option<String>,
    pub ticket_id: Option<String>,
    pub data: AuditEvent,
}
