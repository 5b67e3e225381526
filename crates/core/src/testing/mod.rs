//! Testing utilities and mock implementations.
//!
//! Mocks for the external tracker and the progress sink, plus fixtures for
//! tickets and validation records, so export runs can be exercised without a
//! real tracker.
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_core::testing::{MockExternalClient, RecordingProgressSink};
//!
//! let client = MockExternalClient::new();
//! let sink = RecordingProgressSink::new();
//!
//! // Configure failures
//! client.set_link_error(Some(ExternalError::NotFound("link type".into()))).await;
//!
//! // Use in ExportOrchestrator::new(...)
//! ```

mod mock_external_client;
mod mock_progress_sink;

pub use mock_external_client::{MockExternalClient, RecordedCall};
pub use mock_progress_sink::{FailingProgressSink, RecordingProgressSink};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{Duration, Utc};

    use crate::ticket::{DependencyEdge, EntityGroup, TicketNode};
    use crate::validation::ValidationRecord;

    /// Create an export-ready ticket in set `set-1` with reasonable defaults.
    pub fn ticket(id: &str) -> TicketNode {
        let now = Utc::now();
        TicketNode {
            id: id.to_string(),
            ticket_set_id: "set-1".to_string(),
            title: id.to_string(),
            body: format!("Implement {}.", id),
            attachment: None,
            entity_group: EntityGroup::Content,
            user_order: 0,
            ready_for_export: true,
            external: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a ticket in a specific group and position.
    pub fn grouped_ticket(id: &str, group: EntityGroup, user_order: i64) -> TicketNode {
        let mut t = ticket(id);
        t.entity_group = group;
        t.user_order = user_order;
        t
    }

    /// Edges for a chain where each ticket depends on the next one.
    ///
    /// `chain(&["A", "B", "C"])` yields `A -> B` and `B -> C`, so `C` exports first.
    pub fn chain(ids: &[&str]) -> Vec<DependencyEdge> {
        ids.windows(2)
            .map(|pair| DependencyEdge::new(pair[0], pair[1]))
            .collect()
    }

    /// A passing validation record that is not stale.
    pub fn passed_validation(ticket_set_id: &str) -> ValidationRecord {
        let mut record = ValidationRecord::new(ticket_set_id);
        record.mark_completed(
            true,
            Utc::now() - Duration::minutes(5),
            serde_json::json!({ "errors": [] }),
        );
        record
    }

    /// A passing validation record edited after it passed.
    pub fn stale_validation(ticket_set_id: &str) -> ValidationRecord {
        let mut record = passed_validation(ticket_set_id);
        record.invalidate(Utc::now());
        record
    }
}
