//! Export lifecycle integration tests.
//!
//! These tests drive complete export runs through the orchestrator against a
//! mock tracker and SQLite stores on disk:
//! validating -> ordering -> exporting -> completed | failed | cancelled

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use tessera_core::{
    audit::{AuditEvent, AuditEventEnvelope, AuditHandle},
    config::ExportConfig,
    export::{ExportStatus, ExportTaskStore, ProgressSink, MAX_EXPORT_ATTEMPTS},
    manual_fix::{FixType, ManualFixRegistry, SqliteManualFixStore},
    testing::{fixtures, FailingProgressSink, MockExternalClient, RecordingProgressSink},
    ticket::{
        AttachmentUploadStatus, CreateTicketRequest, DependencyEdge, EntityGroup, ExternalRef,
    },
    validation::ExportBlocked,
    ExportError, ExportOrchestrator, ExternalError, SqliteExportTaskStore, SqliteTicketStore,
    SqliteValidationStore, TicketError, TicketNode, TicketStore, ValidationStore,
};

const SET: &str = "set-1";

/// Test helper wiring the orchestrator to on-disk stores and mocks.
struct TestHarness {
    tickets: Arc<SqliteTicketStore>,
    validations: Arc<SqliteValidationStore>,
    tasks: Arc<SqliteExportTaskStore>,
    fixes: ManualFixRegistry,
    client: Arc<MockExternalClient>,
    sink: RecordingProgressSink,
    audit_rx: mpsc::Receiver<AuditEventEnvelope>,
    audit: AuditHandle,
    /// Title -> ticket id
    ids: HashMap<String, String>,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let tickets =
            Arc::new(SqliteTicketStore::new(&db_path).expect("Failed to create ticket store"));
        let validations = Arc::new(
            SqliteValidationStore::new(&db_path).expect("Failed to create validation store"),
        );
        let tasks =
            Arc::new(SqliteExportTaskStore::new(&db_path).expect("Failed to create task store"));
        let fixes = ManualFixRegistry::new(Arc::new(
            SqliteManualFixStore::new(&db_path).expect("Failed to create manual fix store"),
        ));
        let (tx, audit_rx) = mpsc::channel(1024);

        Self {
            tickets,
            validations,
            tasks,
            fixes,
            client: Arc::new(MockExternalClient::new()),
            sink: RecordingProgressSink::new(),
            audit_rx,
            audit: AuditHandle::new(tx),
            ids: HashMap::new(),
            _temp_dir: temp_dir,
        }
    }

    fn config() -> ExportConfig {
        ExportConfig {
            min_call_interval_ms: 1,
            retry_backoff_ms: 10,
            attachment_threshold_chars: 200,
            progress_buffer: 16,
        }
    }

    fn orchestrator(&self) -> ExportOrchestrator {
        self.orchestrator_with_sink(Arc::new(self.sink.clone()))
    }

    fn orchestrator_with_sink(&self, sink: Arc<dyn ProgressSink>) -> ExportOrchestrator {
        self.build_orchestrator(
            Self::config(),
            Arc::clone(&self.tickets) as Arc<dyn TicketStore>,
            sink,
        )
    }

    fn orchestrator_with_config(&self, config: ExportConfig) -> ExportOrchestrator {
        self.build_orchestrator(
            config,
            Arc::clone(&self.tickets) as Arc<dyn TicketStore>,
            Arc::new(self.sink.clone()),
        )
    }

    fn orchestrator_with_tickets(&self, tickets: Arc<dyn TicketStore>) -> ExportOrchestrator {
        self.build_orchestrator(Self::config(), tickets, Arc::new(self.sink.clone()))
    }

    fn build_orchestrator(
        &self,
        config: ExportConfig,
        tickets: Arc<dyn TicketStore>,
        sink: Arc<dyn ProgressSink>,
    ) -> ExportOrchestrator {
        ExportOrchestrator::new(
            config,
            tickets,
            Arc::clone(&self.validations) as Arc<dyn ValidationStore>,
            Arc::clone(&self.tasks) as Arc<dyn ExportTaskStore>,
            self.fixes.clone(),
            Arc::clone(&self.client) as Arc<dyn tessera_core::ExternalTicketClient>,
            sink,
        )
        .with_audit(self.audit.clone())
    }

    fn add_ticket(&mut self, title: &str) -> String {
        self.add_ticket_with_body(title, &format!("Implement {}.", title))
    }

    fn add_ticket_with_body(&mut self, title: &str, body: &str) -> String {
        let id = self
            .tickets
            .create(CreateTicketRequest::new(SET, title, body, EntityGroup::Content))
            .expect("Failed to create ticket")
            .id;
        self.ids.insert(title.to_string(), id.clone());
        id
    }

    /// `from` depends on `to`, by title.
    fn depend(&self, from: &str, to: &str) {
        self.tickets
            .add_edge(SET, &DependencyEdge::new(&self.ids[from], &self.ids[to]))
            .expect("Failed to add edge");
    }

    /// Tickets A..E chained so E exports first.
    fn chain(&mut self) {
        let titles = ["A", "B", "C", "D", "E"];
        for title in titles {
            self.add_ticket(title);
        }
        for pair in titles.windows(2) {
            self.depend(pair[0], pair[1]);
        }
    }

    fn validate(&self) {
        self.validations
            .save(&fixtures::passed_validation(SET))
            .expect("Failed to save validation");
    }

    fn key_of(&self, title: &str) -> Option<String> {
        self.tickets
            .get(&self.ids[title])
            .unwrap()
            .and_then(|t| t.external.map(|r| r.key))
    }

    fn drain_audit(&mut self) -> Vec<AuditEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = self.audit_rx.try_recv() {
            events.push(envelope.event);
        }
        events
    }

    async fn wait_for_status(&self, expected: ExportStatus, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if let Some(state) = self.tasks.get(SET).unwrap() {
                if state.status == expected {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Ticket store that fails selected writes, delegating everything else.
struct FlakyTicketStore {
    inner: Arc<SqliteTicketStore>,
    /// Remaining `set_attachment` calls that fail.
    attachment_failures: AtomicUsize,
    /// 1-based `set_external_ref` call that fails; 0 never fails.
    fail_external_ref_on: usize,
    external_ref_calls: AtomicUsize,
}

impl FlakyTicketStore {
    fn new(inner: Arc<SqliteTicketStore>) -> Self {
        Self {
            inner,
            attachment_failures: AtomicUsize::new(0),
            fail_external_ref_on: 0,
            external_ref_calls: AtomicUsize::new(0),
        }
    }

    fn failing_attachments(self, count: usize) -> Self {
        self.attachment_failures.store(count, Ordering::SeqCst);
        self
    }

    fn failing_external_ref_on(mut self, call: usize) -> Self {
        self.fail_external_ref_on = call;
        self
    }
}

impl TicketStore for FlakyTicketStore {
    fn create(&self, request: CreateTicketRequest) -> Result<TicketNode, TicketError> {
        self.inner.create(request)
    }

    fn get(&self, id: &str) -> Result<Option<TicketNode>, TicketError> {
        self.inner.get(id)
    }

    fn list_for_set(&self, ticket_set_id: &str) -> Result<Vec<TicketNode>, TicketError> {
        self.inner.list_for_set(ticket_set_id)
    }

    fn list_export_ready(&self, ticket_set_id: &str) -> Result<Vec<TicketNode>, TicketError> {
        self.inner.list_export_ready(ticket_set_id)
    }

    fn set_external_ref(&self, id: &str, external: &ExternalRef) -> Result<(), TicketError> {
        let call = self.external_ref_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_external_ref_on {
            return Err(TicketError::Database("disk I/O error".to_string()));
        }
        self.inner.set_external_ref(id, external)
    }

    fn set_attachment(&self, id: &str, filename: &str, content: &str) -> Result<(), TicketError> {
        let failing = self
            .attachment_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TicketError::Database("database is locked".to_string()));
        }
        self.inner.set_attachment(id, filename, content)
    }

    fn set_attachment_status(
        &self,
        id: &str,
        status: AttachmentUploadStatus,
    ) -> Result<(), TicketError> {
        self.inner.set_attachment_status(id, status)
    }

    fn add_edge(&self, ticket_set_id: &str, edge: &DependencyEdge) -> Result<(), TicketError> {
        self.inner.add_edge(ticket_set_id, edge)
    }

    fn remove_edge(&self, ticket_set_id: &str, edge: &DependencyEdge) -> Result<bool, TicketError> {
        self.inner.remove_edge(ticket_set_id, edge)
    }

    fn list_edges(&self, ticket_set_id: &str) -> Result<Vec<DependencyEdge>, TicketError> {
        self.inner.list_edges(ticket_set_id)
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_chain_exports_dependencies_first_and_links_them() {
    let mut h = TestHarness::new();
    h.chain();
    h.validate();

    let summary = h.orchestrator().export(SET).await.unwrap();

    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.created, 5);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.manual_fixes, 0);
    assert_eq!(summary.attempts, 1);

    assert_eq!(h.client.created_titles().await, vec!["E", "D", "C", "B", "A"]);
    assert_eq!(h.key_of("E").as_deref(), Some("PROJ-1"));
    assert_eq!(h.key_of("A").as_deref(), Some("PROJ-5"));

    // Each ticket is linked as blocked by its dependency.
    assert_eq!(
        h.client.links().await,
        vec![
            ("PROJ-2".to_string(), "PROJ-1".to_string()),
            ("PROJ-3".to_string(), "PROJ-2".to_string()),
            ("PROJ-4".to_string(), "PROJ-3".to_string()),
            ("PROJ-5".to_string(), "PROJ-4".to_string()),
        ]
    );

    let state = h.tasks.get(SET).unwrap().unwrap();
    assert_eq!(state.status, ExportStatus::Completed);
    assert!(state.failure_context.is_none());
}

#[tokio::test]
async fn test_progress_and_audit_trail() {
    let mut h = TestHarness::new();
    h.add_ticket("Content types");
    h.add_ticket("Media types");
    h.validate();

    h.orchestrator().export(SET).await.unwrap();

    let stages = h.sink.stages().await;
    assert_eq!(stages.first().map(String::as_str), Some("Validating"));
    assert_eq!(stages.last().map(String::as_str), Some("Completed"));
    let last = h.sink.last().await.unwrap();
    assert_eq!(last.percentage, 100.0);
    assert_eq!(last.details["total"], 2);

    let exporting: Vec<_> = h
        .sink
        .updates()
        .await
        .into_iter()
        .filter(|u| u.stage == "Exporting tickets")
        .collect();
    assert_eq!(exporting.len(), 2);
    assert_eq!(exporting[0].percentage, 50.0);
    assert!(exporting[0].details.contains_key("current_title"));

    let types: Vec<&str> = h.drain_audit().iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec!["export_started", "ticket_exported", "ticket_exported", "export_completed"]
    );
}

#[tokio::test]
async fn test_reexport_of_completed_set_skips_everything() {
    let mut h = TestHarness::new();
    h.chain();
    h.validate();
    let orchestrator = h.orchestrator();

    let first = orchestrator.export(SET).await.unwrap();
    let second = orchestrator.export(SET).await.unwrap();

    assert_eq!(second.status, ExportStatus::Completed);
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped, 5);
    assert_ne!(first.task_id, second.task_id);
    assert_eq!(h.client.create_attempts(), 5);
}

#[tokio::test]
async fn test_unready_tickets_are_not_exported() {
    let mut h = TestHarness::new();
    h.add_ticket("Ready");
    h.tickets
        .create(CreateTicketRequest::new(SET, "Draft", "wip", EntityGroup::Content).with_ready(false))
        .unwrap();
    h.validate();

    let summary = h.orchestrator().export(SET).await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(h.client.created_titles().await, vec!["Ready"]);
}

// =============================================================================
// Validation gate and ordering
// =============================================================================

#[tokio::test]
async fn test_never_validated_set_is_blocked() {
    let mut h = TestHarness::new();
    h.add_ticket("A");

    let err = h.orchestrator().export(SET).await.unwrap_err();

    assert!(matches!(err, ExportError::Blocked(ExportBlocked::NeverValidated)));
    assert_eq!(h.client.create_attempts(), 0);

    // Blocking does not consume retry budget.
    let state = h.tasks.get(SET).unwrap().unwrap();
    assert_eq!(state.status, ExportStatus::Failed);
    assert_eq!(state.retry_count, 0);

    assert!(h
        .drain_audit()
        .iter()
        .any(|e| matches!(e, AuditEvent::ExportBlocked { .. })));
}

#[tokio::test]
async fn test_stale_validation_is_blocked() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.validations
        .save(&fixtures::stale_validation(SET))
        .unwrap();

    let err = h.orchestrator().export(SET).await.unwrap_err();

    assert!(matches!(err, ExportError::Blocked(ExportBlocked::Stale { .. })));
    assert_eq!(h.client.create_attempts(), 0);
}

#[tokio::test]
async fn test_blocked_then_validated_export_succeeds() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    let orchestrator = h.orchestrator();

    assert!(orchestrator.export(SET).await.is_err());
    h.validate();
    let summary = orchestrator.export(SET).await.unwrap();

    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.created, 1);
}

#[tokio::test]
async fn test_cycle_blocks_export() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.add_ticket("B");
    h.depend("A", "B");
    h.depend("B", "A");
    h.validate();

    let err = h.orchestrator().export(SET).await.unwrap_err();

    match err {
        ExportError::Cycle(cycle) => assert_eq!(cycle.ticket_ids.len(), 3),
        other => panic!("expected cycle error, got {other}"),
    }
    assert_eq!(h.client.create_attempts(), 0);
    assert_eq!(h.tasks.get(SET).unwrap().unwrap().retry_count, 0);
}

// =============================================================================
// Failures and resumption
// =============================================================================

#[tokio::test]
async fn test_chain_failure_resumes_without_duplicates() {
    let mut h = TestHarness::new();
    h.chain();
    h.validate();
    let orchestrator = h.orchestrator();

    // Fourth create is B (order E, D, C, B, A).
    h.client
        .fail_create_on(
            4,
            ExternalError::Api {
                status: 400,
                message: "summary: field required".to_string(),
            },
        )
        .await;

    let err = orchestrator.export(SET).await.unwrap_err();
    match &err {
        ExportError::Client { index, ticket_id, .. } => {
            assert_eq!(*index, 3);
            assert_eq!(ticket_id, &h.ids["B"]);
        }
        other => panic!("expected client error, got {other}"),
    }
    assert_eq!(h.client.created_titles().await, vec!["E", "D", "C"]);

    let state = h.tasks.get(SET).unwrap().unwrap();
    assert_eq!(state.status, ExportStatus::Failed);
    assert_eq!(state.retry_count, 1);
    let context = state.failure_context.unwrap();
    assert_eq!(context.processed_keys, vec!["PROJ-1", "PROJ-2", "PROJ-3"]);
    assert_eq!(context.last_ticket_index, Some(2));
    assert_eq!(context.failed_ticket_id.as_deref(), Some(h.ids["B"].as_str()));

    // Retry creates only what is missing.
    h.client.clear_recorded().await;
    let summary = orchestrator.export(SET).await.unwrap();

    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.skipped, 3);
    assert_eq!(h.client.created_titles().await, vec!["B", "A"]);
    assert_eq!(h.client.create_attempts(), 6);
    assert_eq!(
        h.client.links().await,
        vec![
            ("PROJ-4".to_string(), "PROJ-3".to_string()),
            ("PROJ-5".to_string(), "PROJ-4".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_transient_failure_is_retried_automatically() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.add_ticket("B");
    h.add_ticket("C");
    h.validate();
    h.client.fail_create_on(2, ExternalError::Timeout).await;

    let summary = h.orchestrator().export(SET).await.unwrap();

    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.created, 3);

    let mut titles = h.client.created_titles().await;
    titles.sort();
    assert_eq!(titles, vec!["A", "B", "C"]);

    let events = h.drain_audit();
    assert!(events.iter().any(|e| matches!(
        e,
        AuditEvent::ExportFailed { will_retry: true, retry_count: 1, .. }
    )));
    let state = h.tasks.get(SET).unwrap().unwrap();
    assert_eq!(state.status, ExportStatus::Completed);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.validate();
    h.client
        .fail_create_on(1, ExternalError::RateLimited { retry_after_ms: Some(20) })
        .await;

    let summary = h.orchestrator().export(SET).await.unwrap();

    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.attempts, 2);
    assert_eq!(h.client.create_attempts(), 2);
}

#[tokio::test]
async fn test_set_stays_claimed_during_retry_backoff() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.add_ticket("B");
    h.validate();
    h.client.fail_create_on(2, ExternalError::Timeout).await;
    let orchestrator = Arc::new(h.orchestrator_with_config(ExportConfig {
        retry_backoff_ms: 300,
        ..TestHarness::config()
    }));

    let background = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.export(SET).await }
    });

    // Wait for the failed attempt to be recorded; the backoff follows.
    let mut recorded = false;
    for _ in 0..100 {
        if h.tasks.get(SET).unwrap().is_some_and(|s| s.retry_count == 1) {
            recorded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(recorded, "first attempt never failed");

    let state = h.tasks.get(SET).unwrap().unwrap();
    assert_eq!(state.status, ExportStatus::Running);
    assert!(state.failure_context.is_some());
    assert!(!state.can_retry());

    assert!(matches!(
        orchestrator.export(SET).await,
        Err(ExportError::AlreadyRunning(_))
    ));
    assert!(matches!(
        orchestrator.retry(SET).await,
        Err(ExportError::NotRetryable { .. })
    ));

    let summary = background.await.unwrap().unwrap();
    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.attempts, 2);
    assert_eq!(h.client.create_attempts(), 3);
    assert_eq!(h.client.created_titles().await.len(), 2);
}

#[tokio::test]
async fn test_retry_budget_is_exhausted() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.validate();
    h.client.set_create_error(Some(ExternalError::Timeout)).await;
    let orchestrator = Arc::new(h.orchestrator());

    let err = orchestrator.export(SET).await.unwrap_err();

    match err {
        ExportError::RetryBudgetExhausted { retry_count, .. } => {
            assert_eq!(retry_count, MAX_EXPORT_ATTEMPTS)
        }
        other => panic!("expected exhausted budget, got {other}"),
    }
    assert_eq!(h.client.create_attempts(), MAX_EXPORT_ATTEMPTS as usize);

    let state = h.tasks.get(SET).unwrap().unwrap();
    assert_eq!(state.status, ExportStatus::Failed);
    assert!(!state.can_retry());

    // Neither an operator retry nor a new export may go past the budget.
    assert!(matches!(
        orchestrator.retry(SET).await,
        Err(ExportError::RetryBudgetExhausted { .. })
    ));
    assert!(matches!(
        orchestrator.export(SET).await,
        Err(ExportError::RetryBudgetExhausted { .. })
    ));
    assert_eq!(h.client.create_attempts(), MAX_EXPORT_ATTEMPTS as usize);
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.validate();
    h.client.set_create_error(Some(ExternalError::Unauthorized)).await;

    let err = h.orchestrator().export(SET).await.unwrap_err();

    assert!(matches!(
        err,
        ExportError::Client { source: ExternalError::Unauthorized, .. }
    ));
    assert_eq!(err.category().as_str(), "admin_required");
    assert_eq!(h.client.create_attempts(), 1);
    assert_eq!(h.tasks.get(SET).unwrap().unwrap().retry_count, 1);
}

#[tokio::test]
async fn test_operator_retry_after_permanent_failure() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.add_ticket("B");
    h.validate();
    h.client
        .fail_create_on(
            2,
            ExternalError::Api {
                status: 400,
                message: "bad".to_string(),
            },
        )
        .await;
    let orchestrator = Arc::new(h.orchestrator());

    assert!(orchestrator.export(SET).await.is_err());

    let state = orchestrator.retry(SET).await.unwrap();
    assert_eq!(state.status, ExportStatus::Running);
    assert!(h.wait_for_status(ExportStatus::Completed, Duration::from_secs(5)).await);

    assert_eq!(h.client.created_titles().await.len(), 2);
    assert_eq!(h.tasks.get(SET).unwrap().unwrap().task_id, state.task_id);
}

#[tokio::test]
async fn test_retry_requires_failed_record() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.validate();
    let orchestrator = Arc::new(h.orchestrator());

    assert!(matches!(
        orchestrator.retry(SET).await,
        Err(ExportError::TaskNotFound(_))
    ));

    orchestrator.export(SET).await.unwrap();
    assert!(matches!(
        orchestrator.retry(SET).await,
        Err(ExportError::NotRetryable { .. })
    ));
}

// =============================================================================
// Partial failures
// =============================================================================

#[tokio::test]
async fn test_oversized_body_is_truncated_and_attached() {
    let mut h = TestHarness::new();
    let body = "x".repeat(500);
    let id = h.add_ticket_with_body("Big", &body);
    h.validate();

    let summary = h.orchestrator().export(SET).await.unwrap();
    assert_eq!(summary.manual_fixes, 0);

    let sent = &h.client.created_bodies().await[0];
    assert!(sent.chars().count() <= 200);
    assert!(sent.contains("Content truncated"));

    assert_eq!(
        h.client.uploads().await,
        vec![("PROJ-1".to_string(), format!("{}-full-content.md", id), 500)]
    );
    let ticket = h.tickets.get(&id).unwrap().unwrap();
    assert_eq!(
        ticket.attachment.unwrap().upload_status,
        AttachmentUploadStatus::Uploaded
    );

    assert!(h.drain_audit().iter().any(|e| matches!(
        e,
        AuditEvent::TicketExported { truncated: true, .. }
    )));
}

#[tokio::test]
async fn test_oversized_body_with_upstream_attachment_uploads_both() {
    let mut h = TestHarness::new();
    let body = format!("{}TAIL-MARKER", "x".repeat(300));
    let id = h.add_ticket_with_body("Big", &body);
    h.tickets
        .set_attachment(&id, "schema.csv", "field,type")
        .unwrap();
    h.validate();

    let summary = h.orchestrator().export(SET).await.unwrap();
    assert_eq!(summary.manual_fixes, 0);

    let sent = &h.client.created_bodies().await[0];
    assert!(!sent.contains("TAIL-MARKER"));
    assert!(sent.contains(&format!("{}-full-content.md", id)));

    assert_eq!(
        h.client.uploads().await,
        vec![
            ("PROJ-1".to_string(), "schema.csv".to_string(), 10),
            (
                "PROJ-1".to_string(),
                format!("{}-full-content.md", id),
                body.len()
            ),
        ]
    );

    // The upstream attachment keeps its place on the ticket.
    let attachment = h.tickets.get(&id).unwrap().unwrap().attachment.unwrap();
    assert_eq!(attachment.filename, "schema.csv");
    assert_eq!(attachment.upload_status, AttachmentUploadStatus::Uploaded);
}

#[tokio::test]
async fn test_local_attachment_write_failure_does_not_skip_follow_up() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    let b = h.add_ticket_with_body("B", &"x".repeat(500));
    h.depend("A", "B");
    h.validate();
    let tickets = Arc::new(FlakyTicketStore::new(Arc::clone(&h.tickets)).failing_attachments(1));

    let summary = h
        .orchestrator_with_tickets(tickets as Arc<dyn TicketStore>)
        .export(SET)
        .await
        .unwrap();

    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.attempts, 1);
    assert_eq!(summary.created, 2);
    assert_eq!(
        h.client.uploads().await,
        vec![("PROJ-1".to_string(), format!("{}-full-content.md", b), 500)]
    );
    assert_eq!(
        h.client.links().await,
        vec![("PROJ-2".to_string(), "PROJ-1".to_string())]
    );
}

#[tokio::test]
async fn test_store_failure_mid_export_keeps_cursor() {
    let mut h = TestHarness::new();
    for title in ["A", "B", "C"] {
        h.add_ticket(title);
    }
    h.validate();
    let tickets =
        Arc::new(FlakyTicketStore::new(Arc::clone(&h.tickets)).failing_external_ref_on(2));

    let err = h
        .orchestrator_with_tickets(tickets as Arc<dyn TicketStore>)
        .export(SET)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Ticket(_)), "got {err}");

    let state = h.tasks.get(SET).unwrap().unwrap();
    assert_eq!(state.status, ExportStatus::Failed);
    assert_eq!(state.retry_count, 1);
    let context = state.failure_context.unwrap();
    assert_eq!(context.last_ticket_index, Some(0));
    assert_eq!(context.processed_keys, vec!["PROJ-1"]);
    assert!(h.drain_audit().iter().any(|e| matches!(
        e,
        AuditEvent::ExportFailed { will_retry: false, .. }
    )));
}

#[tokio::test]
async fn test_attachment_failure_becomes_manual_fix() {
    let mut h = TestHarness::new();
    let id = h.add_ticket("With attachment");
    h.tickets
        .set_attachment(&id, "schema.json", "{\"fields\": []}")
        .unwrap();
    h.add_ticket("Plain");
    h.validate();
    h.client
        .set_upload_error(Some(ExternalError::Network("connection reset".to_string())))
        .await;

    let summary = h.orchestrator().export(SET).await.unwrap();

    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.manual_fixes, 1);

    let fixes = h.fixes.list_for_ticket_set(SET).unwrap();
    assert_eq!(fixes.len(), 1);
    assert_eq!(fixes[0].fix_type, FixType::AttachmentUpload);
    assert_eq!(fixes[0].ticket_id, id);
    assert!(fixes[0].instruction.contains("schema.json"));
    assert!(fixes[0].error.contains("connection reset"));

    let ticket = h.tickets.get(&id).unwrap().unwrap();
    assert!(ticket.is_exported());
    assert_eq!(
        ticket.attachment.unwrap().upload_status,
        AttachmentUploadStatus::Failed
    );
}

#[tokio::test]
async fn test_link_failure_becomes_manual_fix() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.add_ticket("B");
    h.depend("A", "B");
    h.validate();
    h.client
        .set_link_error(Some(ExternalError::NotFound("link type Blocks".to_string())))
        .await;

    let summary = h.orchestrator().export(SET).await.unwrap();

    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.manual_fixes, 1);

    let fixes = h.fixes.list_for_ticket_set(SET).unwrap();
    assert_eq!(fixes[0].fix_type, FixType::DependencyLink);
    assert_eq!(fixes[0].ticket_id, h.ids["A"]);
    assert_eq!(fixes[0].external_key, "PROJ-2");
    assert!(fixes[0].instruction.contains("PROJ-1"));
}

#[tokio::test]
async fn test_failing_sink_does_not_abort_export() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.add_ticket("B");
    h.validate();
    let sink = Arc::new(FailingProgressSink::new());

    let summary = h
        .orchestrator_with_sink(Arc::clone(&sink) as Arc<dyn ProgressSink>)
        .export(SET)
        .await
        .unwrap();

    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.created, 2);
    assert!(sink.attempts() >= 3);
}

// =============================================================================
// Exclusivity, cancellation and recovery
// =============================================================================

#[tokio::test]
async fn test_second_export_is_rejected_while_running() {
    let mut h = TestHarness::new();
    for title in ["A", "B", "C"] {
        h.add_ticket(title);
    }
    h.validate();
    h.client.set_create_delay(Some(Duration::from_millis(50))).await;
    let orchestrator = Arc::new(h.orchestrator());

    let state = orchestrator.launch(SET).await.unwrap();
    assert_eq!(state.status, ExportStatus::Running);

    assert!(matches!(
        orchestrator.export(SET).await,
        Err(ExportError::AlreadyRunning(_))
    ));
    assert!(matches!(
        orchestrator.launch(SET).await,
        Err(ExportError::AlreadyRunning(_))
    ));

    assert!(h.wait_for_status(ExportStatus::Completed, Duration::from_secs(5)).await);
    assert_eq!(h.client.created_titles().await.len(), 3);
}

#[tokio::test]
async fn test_launch_reports_blocked_gate_immediately() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    let orchestrator = Arc::new(h.orchestrator());

    let err = orchestrator.launch(SET).await.unwrap_err();

    assert!(matches!(err, ExportError::Blocked(ExportBlocked::NeverValidated)));
    assert!(h.tasks.get(SET).unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_stops_at_ticket_boundary_and_resumes() {
    let mut h = TestHarness::new();
    for title in ["A", "B", "C", "D", "E"] {
        h.add_ticket(title);
    }
    h.validate();
    h.client.set_create_delay(Some(Duration::from_millis(50))).await;
    let orchestrator = Arc::new(h.orchestrator());

    orchestrator.launch(SET).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(orchestrator.cancel(SET));

    assert!(h.wait_for_status(ExportStatus::Cancelled, Duration::from_secs(5)).await);
    let created_before = h.client.created_titles().await.len();
    assert!(created_before >= 1 && created_before < 5);

    // The run lets go of the set shortly after the record is saved; after that
    // there is nothing left to cancel.
    let mut released = false;
    for _ in 0..100 {
        if !orchestrator.cancel(SET) {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released, "cancel flag never released");
    assert!(h
        .drain_audit()
        .iter()
        .any(|e| matches!(e, AuditEvent::ExportCancelled { .. })));

    h.client.set_create_delay(None).await;
    let summary = orchestrator.export(SET).await.unwrap();
    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.skipped, created_before);

    let mut titles = h.client.created_titles().await;
    titles.sort();
    assert_eq!(titles, vec!["A", "B", "C", "D", "E"]);
}

#[tokio::test]
async fn test_cancel_right_after_launch_is_honoured() {
    let mut h = TestHarness::new();
    for title in ["A", "B", "C"] {
        h.add_ticket(title);
    }
    h.validate();
    let orchestrator = Arc::new(h.orchestrator());

    orchestrator.launch(SET).await.unwrap();
    assert!(orchestrator.cancel(SET));

    assert!(h.wait_for_status(ExportStatus::Cancelled, Duration::from_secs(5)).await);
    assert_eq!(h.client.create_attempts(), 0);
}

#[tokio::test]
async fn test_recover_interrupted_marks_failed_and_allows_resume() {
    let mut h = TestHarness::new();
    h.add_ticket("A");
    h.validate();

    // A previous process claimed the set and died.
    let orphan = h.tasks.try_begin(SET).unwrap();

    let orchestrator = h.orchestrator();
    assert_eq!(orchestrator.recover_interrupted().await.unwrap(), 1);

    let state = h.tasks.get(SET).unwrap().unwrap();
    assert_eq!(state.status, ExportStatus::Failed);
    assert_eq!(state.retry_count, 1);
    assert_eq!(state.failure_context.unwrap().error, "interrupted");
    assert!(h.drain_audit().iter().any(|e| matches!(
        e,
        AuditEvent::ExportInterrupted { task_id, .. } if *task_id == orphan.task_id
    )));

    let summary = orchestrator.export(SET).await.unwrap();
    assert_eq!(summary.status, ExportStatus::Completed);
    assert_eq!(summary.task_id, orphan.task_id);
}
