//! Core ticket data types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default body length (in characters) above which content moves to an attachment.
pub const DEFAULT_ATTACHMENT_THRESHOLD_CHARS: usize = 30_000;

// ============================================================================
// Entity Groups
// ============================================================================

/// Entity group a generated ticket belongs to.
///
/// The declaration order is the export priority order: when several tickets
/// are ready at the same time, lower groups are exported first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityGroup {
    Content,
    Media,
    Views,
    Migration,
    Workflow,
    UserRoles,
    Custom,
}

impl EntityGroup {
    /// All groups in priority order.
    pub const ALL: [EntityGroup; 7] = [
        EntityGroup::Content,
        EntityGroup::Media,
        EntityGroup::Views,
        EntityGroup::Migration,
        EntityGroup::Workflow,
        EntityGroup::UserRoles,
        EntityGroup::Custom,
    ];

    /// Position in the fixed priority order (0 = exported first).
    pub fn priority(&self) -> u8 {
        *self as u8
    }

    /// Human-readable label, as used by the upstream spreadsheet stage.
    pub fn label(&self) -> &'static str {
        match self {
            EntityGroup::Content => "Content",
            EntityGroup::Media => "Media",
            EntityGroup::Views => "Views",
            EntityGroup::Migration => "Migration",
            EntityGroup::Workflow => "Workflow",
            EntityGroup::UserRoles => "User Roles",
            EntityGroup::Custom => "Custom",
        }
    }

    /// Parse an upstream group tag. Unknown tags fall into `Custom`.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "content" => EntityGroup::Content,
            "media" => EntityGroup::Media,
            "views" => EntityGroup::Views,
            "migration" => EntityGroup::Migration,
            "workflow" => EntityGroup::Workflow,
            "user roles" => EntityGroup::UserRoles,
            _ => EntityGroup::Custom,
        }
    }
}

impl fmt::Display for EntityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// External Reference & Attachments
// ============================================================================

/// Reference to a ticket created in the external tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalRef {
    /// Key assigned by the external system (e.g. `PROJ-123`).
    pub key: String,
    /// Browse URL of the created ticket.
    pub url: String,
}

/// Upload status of an attachment to the external tracker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentUploadStatus {
    #[default]
    Pending,
    Uploaded,
    Failed,
}

impl AttachmentUploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentUploadStatus::Pending => "pending",
            AttachmentUploadStatus::Uploaded => "uploaded",
            AttachmentUploadStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AttachmentUploadStatus::Pending),
            "uploaded" => Some(AttachmentUploadStatus::Uploaded),
            "failed" => Some(AttachmentUploadStatus::Failed),
            _ => None,
        }
    }
}

/// Oversized content generated upstream for a single ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown in the external tracker.
    pub filename: String,
    /// Full content of the attachment.
    pub content: String,
    /// Upload status.
    #[serde(default)]
    pub upload_status: AttachmentUploadStatus,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            upload_status: AttachmentUploadStatus::Pending,
        }
    }

    /// Size of the content in bytes.
    pub fn size_bytes(&self) -> usize {
        self.content.len()
    }
}

// ============================================================================
// Tickets & Edges
// ============================================================================

/// A generated ticket destined for the external tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketNode {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Ticket set this ticket belongs to.
    pub ticket_set_id: String,
    /// Ticket title (becomes the external summary).
    pub title: String,
    /// Ticket body.
    pub body: String,
    /// Oversized-content attachment, if one was generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Entity group tag.
    pub entity_group: EntityGroup,
    /// User-assigned order within the entity group.
    pub user_order: i64,
    /// Whether the reviewer marked this ticket ready for export.
    pub ready_for_export: bool,
    /// External reference, set once the ticket exists externally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalRef>,
    /// When the ticket was created.
    pub created_at: DateTime<Utc>,
    /// When the ticket was last updated.
    pub updated_at: DateTime<Utc>,
}

impl TicketNode {
    /// Whether this ticket already exists in the external tracker.
    pub fn is_exported(&self) -> bool {
        self.external.is_some()
    }

    /// External key, if exported.
    pub fn external_key(&self) -> Option<&str> {
        self.external.as_ref().map(|r| r.key.as_str())
    }

    /// Body length in characters.
    pub fn character_count(&self) -> usize {
        self.body.chars().count()
    }

    /// Whether the body exceeds what the external tracker accepts inline.
    pub fn needs_attachment(&self, threshold_chars: usize) -> bool {
        self.character_count() > threshold_chars
    }

    /// File name used when the full body has to be shipped as an attachment.
    fn overflow_filename(&self) -> String {
        format!("{}-full-content.md", self.id)
    }

    /// Body to send inline when creating the external ticket.
    ///
    /// Oversized bodies are cut at the threshold and point at the synthesized
    /// attachment that carries the full text.
    pub fn export_body(&self, threshold_chars: usize) -> String {
        if !self.needs_attachment(threshold_chars) {
            return self.body.clone();
        }

        let filename = self.overflow_filename();
        let notice = format!("\n\n[Content truncated. See attachment {} for the full text.]", filename);
        let keep = threshold_chars.saturating_sub(notice.chars().count());
        let mut body: String = self.body.chars().take(keep).collect();
        body.push_str(&notice);
        body
    }

    /// Attachments to upload after creation.
    ///
    /// The upstream attachment comes first. An oversized body adds a
    /// synthesized attachment holding the full body, even when an upstream
    /// attachment exists, since that one carries different content.
    pub fn export_attachments(&self, threshold_chars: usize) -> Vec<Attachment> {
        let mut attachments: Vec<Attachment> = self.attachment.iter().cloned().collect();
        if self.needs_attachment(threshold_chars) {
            attachments.push(Attachment::new(self.overflow_filename(), self.body.clone()));
        }
        attachments
    }
}

/// A directed dependency: `from` cannot be meaningfully actioned before `to`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
}

impl DependencyEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}
