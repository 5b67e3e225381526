//! Common test utilities for E2E testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! backed by SQLite stores in a temp directory and a mock tracker, so the
//! API can be exercised without external infrastructure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use tessera_core::{
    config::{DatabaseConfig, ExportConfig, ServerConfig},
    create_audit_system,
    testing::MockExternalClient,
    ticket::{CreateTicketRequest, EntityGroup},
    AuditStore, BroadcastProgressSink, Config, ExportOrchestrator, ExportTaskStore,
    ExternalTicketClient, ManualFixRegistry, ProgressSink, SqliteAuditStore,
    SqliteExportTaskStore, SqliteManualFixStore, SqliteTicketStore, SqliteValidationStore,
    TicketStore, ValidationStore,
};

/// Re-export fixtures for test convenience
pub use tessera_core::testing::fixtures;

/// Ticket set every fixture helper works on.
pub const SET: &str = "set-1";

/// Test fixture for E2E testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_export_starts() {
///     let mut fixture = TestFixture::new().await;
///     fixture.add_ticket("A");
///     fixture.validate();
///
///     let response = fixture.post_empty("/api/v1/ticket-sets/set-1/export").await;
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock tracker - configure failures, inspect calls
    pub client: Arc<MockExternalClient>,
    /// Ticket store for seeding
    pub tickets: Arc<SqliteTicketStore>,
    /// Validation store for seeding
    pub validations: Arc<SqliteValidationStore>,
    /// Title -> ticket id
    pub ids: HashMap<String, String>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with a tracker configured.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let export_config = ExportConfig {
            min_call_interval_ms: 1,
            retry_backoff_ms: 10,
            attachment_threshold_chars: 200,
            progress_buffer: 64,
        };

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            export: export_config.clone(),
            jira: None,
        };

        // Create stores
        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let tickets =
            Arc::new(SqliteTicketStore::new(&db_path).expect("Failed to create ticket store"));
        let validations = Arc::new(
            SqliteValidationStore::new(&db_path).expect("Failed to create validation store"),
        );
        let tasks: Arc<dyn ExportTaskStore> = Arc::new(
            SqliteExportTaskStore::new(&db_path).expect("Failed to create export task store"),
        );
        let manual_fixes = ManualFixRegistry::new(Arc::new(
            SqliteManualFixStore::new(&db_path).expect("Failed to create manual fix store"),
        ));

        // Create audit system
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);

        // Spawn audit writer
        tokio::spawn(audit_writer.run());

        let progress = BroadcastProgressSink::new(export_config.progress_buffer);
        let client = Arc::new(MockExternalClient::new());

        let orchestrator = if test_config.enable_tracker {
            Some(Arc::new(
                ExportOrchestrator::new(
                    export_config,
                    Arc::clone(&tickets) as Arc<dyn TicketStore>,
                    Arc::clone(&validations) as Arc<dyn ValidationStore>,
                    Arc::clone(&tasks),
                    manual_fixes.clone(),
                    Arc::clone(&client) as Arc<dyn ExternalTicketClient>,
                    Arc::new(progress.clone()) as Arc<dyn ProgressSink>,
                )
                .with_audit(audit_handle.clone()),
            ))
        } else {
            None
        };

        let state = Arc::new(tessera_server::state::AppState::new(
            config,
            audit_handle,
            audit_store,
            Arc::clone(&tickets) as Arc<dyn TicketStore>,
            Arc::clone(&validations) as Arc<dyn ValidationStore>,
            tasks,
            manual_fixes,
            orchestrator,
            progress,
        ));

        // Create router
        let router = tessera_server::api::create_router(state);

        Self {
            router,
            client,
            tickets,
            validations,
            ids: HashMap::new(),
            temp_dir,
        }
    }

    /// Seed an export-ready ticket in [`SET`] and return its id.
    pub fn add_ticket(&mut self, title: &str) -> String {
        self.add_ticket_in(SET, title)
    }

    /// Seed an export-ready ticket in another set and return its id.
    pub fn add_ticket_in(&mut self, set: &str, title: &str) -> String {
        let ticket = self
            .tickets
            .create(CreateTicketRequest::new(
                set,
                title,
                format!("Implement {}.", title),
                EntityGroup::Content,
            ))
            .expect("Failed to create ticket");
        self.ids.insert(title.to_string(), ticket.id.clone());
        ticket.id
    }

    /// Id of a seeded ticket by title.
    pub fn id(&self, title: &str) -> String {
        self.ids
            .get(title)
            .cloned()
            .unwrap_or_else(|| panic!("no ticket titled {}", title))
    }

    /// Record a passing validation run for [`SET`].
    pub fn validate(&self) {
        self.validations
            .save(&fixtures::passed_validation(SET))
            .expect("Failed to save validation");
    }

    /// Poll the export record until it reaches `status`.
    pub async fn wait_for_export_status(&self, status: &str) -> TestResponse {
        let path = format!("/api/v1/ticket-sets/{}/export", SET);
        for _ in 0..200 {
            let response = self.get(&path).await;
            if response.status == StatusCode::OK && response.body["status"] == status {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("export of {} never reached status {}", SET, status);
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request with JSON body.
    pub async fn delete_with_body(&self, path: &str, body: Value) -> TestResponse {
        self.request("DELETE", path, Some(body)).await
    }

    /// Send a raw request and return only the status.
    pub async fn raw_status(&self, request: Request<Body>) -> StatusCode {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
            .status()
    }

    /// Send a GET request and return the body as text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Wire an orchestrator to the mock tracker
    pub enable_tracker: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            enable_tracker: true,
        }
    }
}

impl TestConfig {
    /// Create config without a tracker, so exports are unavailable.
    pub fn without_tracker() -> Self {
        Self {
            enable_tracker: false,
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
