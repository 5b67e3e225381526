//! Ticket storage trait and types.

use thiserror::Error;

use crate::ticket::{AttachmentUploadStatus, DependencyEdge, EntityGroup, ExternalRef, TicketNode};

/// Error type for ticket operations.
#[derive(Debug, Error)]
pub enum TicketError {
    /// Ticket not found.
    #[error("Ticket not found: {0}")]
    NotFound(String),

    /// The ticket has no attachment to update.
    #[error("Ticket {0} has no attachment")]
    NoAttachment(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

/// Request to create a new ticket (used by the upstream generation stage).
#[derive(Debug, Clone)]
pub struct CreateTicketRequest {
    /// Ticket set the ticket belongs to.
    pub ticket_set_id: String,
    /// Ticket title.
    pub title: String,
    /// Ticket body.
    pub body: String,
    /// Entity group.
    pub entity_group: EntityGroup,
    /// Order within the entity group.
    pub user_order: i64,
    /// Whether the ticket is ready for export.
    pub ready_for_export: bool,
}

impl CreateTicketRequest {
    /// Create a request for an export-ready ticket with order 0.
    pub fn new(
        ticket_set_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        entity_group: EntityGroup,
    ) -> Self {
        Self {
            ticket_set_id: ticket_set_id.into(),
            title: title.into(),
            body: body.into(),
            entity_group,
            user_order: 0,
            ready_for_export: true,
        }
    }

    /// Set the user order.
    pub fn with_user_order(mut self, user_order: i64) -> Self {
        self.user_order = user_order;
        self
    }

    /// Set the ready-for-export flag.
    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready_for_export = ready;
        self
    }
}

/// Trait for ticket storage backends.
pub trait TicketStore: Send + Sync {
    /// Create a new ticket.
    fn create(&self, request: CreateTicketRequest) -> Result<TicketNode, TicketError>;

    /// Get a ticket by ID.
    fn get(&self, id: &str) -> Result<Option<TicketNode>, TicketError>;

    /// List every ticket in a ticket set.
    fn list_for_set(&self, ticket_set_id: &str) -> Result<Vec<TicketNode>, TicketError>;

    /// List the tickets in a set that are marked ready for export.
    fn list_export_ready(&self, ticket_set_id: &str) -> Result<Vec<TicketNode>, TicketError>;

    /// Record the external reference of a ticket after it was created externally.
    fn set_external_ref(&self, id: &str, external: &ExternalRef) -> Result<(), TicketError>;

    /// Attach oversized content to a ticket (replaces any previous attachment).
    fn set_attachment(&self, id: &str, filename: &str, content: &str) -> Result<(), TicketError>;

    /// Update the upload status of a ticket's attachment.
    fn set_attachment_status(
        &self,
        id: &str,
        status: AttachmentUploadStatus,
    ) -> Result<(), TicketError>;

    /// Persist a dependency edge. Inserting an existing edge is a no-op.
    ///
    /// Stores do not check for cycles; callers go through `DependencyGraph`.
    fn add_edge(&self, ticket_set_id: &str, edge: &DependencyEdge) -> Result<(), TicketError>;

    /// Remove a dependency edge. Returns whether it existed.
    fn remove_edge(&self, ticket_set_id: &str, edge: &DependencyEdge) -> Result<bool, TicketError>;

    /// List the dependency edges of a ticket set.
    fn list_edges(&self, ticket_set_id: &str) -> Result<Vec<DependencyEdge>, TicketError>;
}
