//! Manual fix types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of follow-up an operator has to perform in the external tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    /// An attachment could not be uploaded to an already-created ticket.
    AttachmentUpload,
    /// A dependency link between two created tickets could not be made.
    DependencyLink,
}

impl FixType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixType::AttachmentUpload => "attachment_upload",
            FixType::DependencyLink => "dependency_link",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "attachment_upload" => Some(FixType::AttachmentUpload),
            "dependency_link" => Some(FixType::DependencyLink),
            _ => None,
        }
    }
}

impl std::fmt::Display for FixType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A manual fix to record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewManualFix {
    pub ticket_set_id: String,
    pub ticket_id: String,
    pub fix_type: FixType,
    /// External key of the ticket the operator has to touch.
    pub external_key: String,
    /// What the operator should do.
    pub instruction: String,
    /// Error reported by the external tracker.
    pub error: String,
}

impl NewManualFix {
    /// Attachment that has to be uploaded by hand.
    pub fn attachment_upload(
        ticket_set_id: impl Into<String>,
        ticket_id: impl Into<String>,
        external_key: impl Into<String>,
        filename: &str,
        error: impl Into<String>,
    ) -> Self {
        let external_key = external_key.into();
        Self {
            ticket_set_id: ticket_set_id.into(),
            ticket_id: ticket_id.into(),
            fix_type: FixType::AttachmentUpload,
            instruction: format!("Upload attachment '{}' to {} manually.", filename, external_key),
            external_key,
            error: error.into(),
        }
    }

    /// Link between `external_key` and `depends_on_key` that has to be created by hand.
    pub fn dependency_link(
        ticket_set_id: impl Into<String>,
        ticket_id: impl Into<String>,
        external_key: impl Into<String>,
        depends_on_key: &str,
        error: impl Into<String>,
    ) -> Self {
        let external_key = external_key.into();
        Self {
            ticket_set_id: ticket_set_id.into(),
            ticket_id: ticket_id.into(),
            fix_type: FixType::DependencyLink,
            instruction: format!(
                "Link {} as blocked by {} manually.",
                external_key, depends_on_key
            ),
            external_key,
            error: error.into(),
        }
    }
}

/// A recorded manual fix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualFixEntry {
    pub id: i64,
    pub ticket_set_id: String,
    pub ticket_id: String,
    pub fix_type: FixType,
    pub external_key: String,
    pub instruction: String,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_type_round_trip() {
        for fix_type in [FixType::AttachmentUpload, FixType::DependencyLink] {
            assert_eq!(FixType::parse(fix_type.as_str()), Some(fix_type));
        }
        assert_eq!(FixType::parse("rollback"), None);
    }

    #[test]
    fn test_fix_type_serializes_snake_case() {
        let json = serde_json::to_string(&FixType::DependencyLink).unwrap();
        assert_eq!(json, "\"dependency_link\"");
    }

    #[test]
    fn test_instructions_name_the_keys() {
        let fix = NewManualFix::attachment_upload("s", "t", "PROJ-3", "full.md", "HTTP 500");
        assert!(fix.instruction.contains("full.md"));
        assert!(fix.instruction.contains("PROJ-3"));

        let fix = NewManualFix::dependency_link("s", "t", "PROJ-3", "PROJ-1", "HTTP 500");
        assert!(fix.instruction.contains("PROJ-3"));
        assert!(fix.instruction.contains("PROJ-1"));
        assert_eq!(fix.fix_type, FixType::DependencyLink);
    }
}
