//! Mock external tracker client for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::external::{CreatedTicket, ExternalError, ExternalTicketClient};

/// A recorded tracker call for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    CreateTicket {
        title: String,
        body: String,
        key: String,
    },
    UploadAttachment {
        key: String,
        filename: String,
        size_bytes: usize,
    },
    CreateLink {
        /// The blocked ticket.
        key: String,
        /// The ticket it is blocked by.
        blocked_by: String,
    },
}

/// Mock implementation of the ExternalTicketClient trait.
///
/// Provides controllable behavior for testing:
/// - Sequential keys (`PROJ-1`, `PROJ-2`, ...)
/// - Failing a specific create call, or every create call
/// - Failing uploads and links
/// - Slowing down creates so a run can be cancelled mid-way
///
/// # Example
///
/// ```rust,ignore
/// use tessera_core::testing::MockExternalClient;
///
/// let client = MockExternalClient::new();
/// client.fail_create_on(4, ExternalError::Timeout).await;
///
/// // ... run an export ...
///
/// assert_eq!(client.created_titles().await, vec!["E", "D", "C"]);
/// ```
#[derive(Debug)]
pub struct MockExternalClient {
    /// Successful calls, in order.
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    /// Create attempts so far, including failed ones.
    create_attempts: AtomicUsize,
    /// Keys handed out so far.
    issued: AtomicUsize,
    /// Failures keyed by 1-based create attempt number.
    create_failures: Arc<RwLock<HashMap<usize, ExternalError>>>,
    /// If set, every create fails with this error.
    create_error: Arc<RwLock<Option<ExternalError>>>,
    /// If set, every upload fails with this error.
    upload_error: Arc<RwLock<Option<ExternalError>>>,
    /// If set, every link fails with this error.
    link_error: Arc<RwLock<Option<ExternalError>>>,
    /// Simulated latency of a create call.
    create_delay: Arc<RwLock<Option<Duration>>>,
}

impl Default for MockExternalClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExternalClient {
    /// Create a mock client where every call succeeds.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            create_attempts: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            create_failures: Arc::new(RwLock::new(HashMap::new())),
            create_error: Arc::new(RwLock::new(None)),
            upload_error: Arc::new(RwLock::new(None)),
            link_error: Arc::new(RwLock::new(None)),
            create_delay: Arc::new(RwLock::new(None)),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Fail the `n`th create attempt (1-based, counting failed attempts too).
    pub async fn fail_create_on(&self, n: usize, error: ExternalError) {
        self.create_failures.write().await.insert(n, error);
    }

    /// Fail every create call until cleared.
    pub async fn set_create_error(&self, error: Option<ExternalError>) {
        *self.create_error.write().await = error;
    }

    /// Fail every attachment upload until cleared.
    pub async fn set_upload_error(&self, error: Option<ExternalError>) {
        *self.upload_error.write().await = error;
    }

    /// Fail every link creation until cleared.
    pub async fn set_link_error(&self, error: Option<ExternalError>) {
        *self.link_error.write().await = error;
    }

    /// Delay every create call.
    pub async fn set_create_delay(&self, delay: Option<Duration>) {
        *self.create_delay.write().await = delay;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// All successful calls, in order.
    pub async fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Titles of successfully created tickets, in order.
    pub async fn created_titles(&self) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|c| match c {
                RecordedCall::CreateTicket { title, .. } => Some(title.clone()),
                _ => None,
            })
            .collect()
    }

    /// Bodies of successfully created tickets, in order.
    pub async fn created_bodies(&self) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|c| match c {
                RecordedCall::CreateTicket { body, .. } => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    /// Successful uploads as `(key, filename, size_bytes)`.
    pub async fn uploads(&self) -> Vec<(String, String, usize)> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|c| match c {
                RecordedCall::UploadAttachment {
                    key,
                    filename,
                    size_bytes,
                } => Some((key.clone(), filename.clone(), *size_bytes)),
                _ => None,
            })
            .collect()
    }

    /// Successful links as `(key, blocked_by)`.
    pub async fn links(&self) -> Vec<(String, String)> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|c| match c {
                RecordedCall::CreateLink { key, blocked_by } => {
                    Some((key.clone(), blocked_by.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Create attempts so far, including failed ones.
    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    /// Clear recorded calls. Key numbering continues.
    pub async fn clear_recorded(&self) {
        self.calls.write().await.clear();
    }
}

#[async_trait]
impl ExternalTicketClient for MockExternalClient {
    async fn create_ticket(&self, title: &str, body: &str) -> Result<CreatedTicket, ExternalError> {
        let attempt = self.create_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.create_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.create_failures.write().await.remove(&attempt) {
            return Err(error);
        }
        if let Some(error) = self.create_error.read().await.clone() {
            return Err(error);
        }

        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let key = format!("PROJ-{}", n);
        self.calls.write().await.push(RecordedCall::CreateTicket {
            title: title.to_string(),
            body: body.to_string(),
            key: key.clone(),
        });

        Ok(CreatedTicket {
            url: format!("https://tracker.test/browse/{}", key),
            key,
        })
    }

    async fn upload_attachment(
        &self,
        key: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<(), ExternalError> {
        if let Some(error) = self.upload_error.read().await.clone() {
            return Err(error);
        }
        self.calls.write().await.push(RecordedCall::UploadAttachment {
            key: key.to_string(),
            filename: filename.to_string(),
            size_bytes: content.len(),
        });
        Ok(())
    }

    async fn create_link(&self, key_a: &str, key_b: &str) -> Result<(), ExternalError> {
        if let Some(error) = self.link_error.read().await.clone() {
            return Err(error);
        }
        self.calls.write().await.push(RecordedCall::CreateLink {
            key: key_a.to_string(),
            blocked_by: key_b.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keys_are_sequential() {
        let client = MockExternalClient::new();
        let a = client.create_ticket("A", "body").await.unwrap();
        let b = client.create_ticket("B", "body").await.unwrap();
        assert_eq!(a.key, "PROJ-1");
        assert_eq!(b.key, "PROJ-2");
        assert_eq!(client.created_titles().await, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_fail_create_on_nth_attempt_only() {
        let client = MockExternalClient::new();
        client.fail_create_on(2, ExternalError::Timeout).await;

        assert!(client.create_ticket("A", "").await.is_ok());
        assert_eq!(
            client.create_ticket("B", "").await.unwrap_err(),
            ExternalError::Timeout
        );
        let c = client.create_ticket("C", "").await.unwrap();

        assert_eq!(c.key, "PROJ-2");
        assert_eq!(client.create_attempts(), 3);
    }

    #[tokio::test]
    async fn test_link_and_upload_failures() {
        let client = MockExternalClient::new();
        client
            .set_link_error(Some(ExternalError::NotFound("link type".into())))
            .await;
        client
            .set_upload_error(Some(ExternalError::Network("reset".into())))
            .await;

        assert!(client.create_link("PROJ-1", "PROJ-2").await.is_err());
        assert!(client.upload_attachment("PROJ-1", "a.md", b"x").await.is_err());
        assert!(client.recorded_calls().await.is_empty());
    }
}
