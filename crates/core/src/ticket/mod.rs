//! Ticket model: generated tickets, their dependency edges and storage.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteTicketStore;
pub use store::{CreateTicketRequest, TicketError, TicketStore};
pub use types::{
    Attachment, AttachmentUploadStatus, DependencyEdge, EntityGroup, ExternalRef, TicketNode,
    DEFAULT_ATTACHMENT_THRESHOLD_CHARS,
};
