//! Export orchestrator.
//!
//! Drives one ticket set through validation, ordering and sequential ticket
//! creation against the external tracker:
//! - Exclusivity: one running export per ticket set (`ExportTaskStore::try_begin`)
//! - Resumability: tickets that already carry an external key are never re-created
//! - Partial failures (attachments, links) become manual fixes and never stop the run

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::config::ExportConfig;
use crate::external::{CreatedTicket, ExternalError, ExternalTicketClient};
use crate::graph::DependencyGraph;
use crate::manual_fix::{ManualFixRegistry, NewManualFix};
use crate::metrics;
use crate::ticket::{AttachmentUploadStatus, ExternalRef, TicketNode, TicketStore};
use crate::validation::{check_export_allowed, ValidationStore};

use super::progress::ExportProgressTracker;
use super::sink::{ProgressSink, ProgressUpdate};
use super::task_store::ExportTaskStore;
use super::{
    CallPacer, ExportError, ExportPhase, ExportStatus, ExportSummary,
    ExportTaskState, FailureContext,
};

/// Where the current attempt has got to, in export order.
#[derive(Debug, Default)]
struct Cursor {
    last_ticket_index: Option<usize>,
    processed_keys: Vec<String>,
}

/// Counters accumulated over every attempt of one `export` call.
#[derive(Debug, Default)]
struct RunCounters {
    total: usize,
    created: usize,
    skipped: usize,
    manual_fixes: usize,
    attempts: u32,
}

enum AttemptOutcome {
    Completed,
    Cancelled,
}

/// The export orchestrator.
pub struct ExportOrchestrator {
    config: ExportConfig,
    tickets: Arc<dyn TicketStore>,
    validations: Arc<dyn ValidationStore>,
    tasks: Arc<dyn ExportTaskStore>,
    manual_fixes: ManualFixRegistry,
    client: Arc<dyn ExternalTicketClient>,
    sink: Arc<dyn ProgressSink>,
    pacer: CallPacer,
    audit: Option<AuditHandle>,

    // Runtime state
    cancellations: Mutex<HashMap<String, Arc<AtomicBool>>>,
    phases: RwLock<HashMap<String, ExportPhase>>,
}

impl ExportOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: ExportConfig,
        tickets: Arc<dyn TicketStore>,
        validations: Arc<dyn ValidationStore>,
        tasks: Arc<dyn ExportTaskStore>,
        manual_fixes: ManualFixRegistry,
        client: Arc<dyn ExternalTicketClient>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let pacer = CallPacer::new(Duration::from_millis(config.min_call_interval_ms));
        Self {
            config,
            tickets,
            validations,
            tasks,
            manual_fixes,
            client,
            sink,
            pacer,
            audit: None,
            cancellations: Mutex::new(HashMap::new()),
            phases: RwLock::new(HashMap::new()),
        }
    }

    /// Attach an audit handle.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Export a ticket set, returning once it reaches a terminal state.
    pub async fn export(&self, ticket_set_id: &str) -> Result<ExportSummary, ExportError> {
        let task = self.tasks.try_begin(ticket_set_id)?;
        let cancel = self.register_cancel(ticket_set_id);
        self.run(task, cancel).await
    }

    /// Claim a ticket set and export it in a background task.
    ///
    /// The validation gate and the exclusivity check run before returning, so
    /// the caller learns about a blocked or already-running export immediately.
    pub async fn launch(self: &Arc<Self>, ticket_set_id: &str) -> Result<ExportTaskState, ExportError> {
        if let Err(blocked) = self.check_gate(ticket_set_id) {
            warn!(ticket_set_id, "Export blocked: {}", blocked);
            metrics::EXPORT_RUNS.with_label_values(&["blocked"]).inc();
            self.record_blocked(ticket_set_id, &blocked).await;
            return Err(blocked);
        }

        let task = self.tasks.try_begin(ticket_set_id)?;
        let returned = task.clone();
        // Registered before spawning so a cancel right after launch is not lost.
        let cancel = self.register_cancel(ticket_set_id);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let set_id = task.ticket_set_id.clone();
            match this.run(task, cancel).await {
                Ok(summary) => debug!(ticket_set_id = %set_id, status = %summary.status, "Background export finished"),
                Err(e) => warn!(ticket_set_id = %set_id, "Background export ended with error: {}", e),
            }
        });

        Ok(returned)
    }

    /// Operator-triggered retry of a failed export with budget left.
    pub async fn retry(self: &Arc<Self>, ticket_set_id: &str) -> Result<ExportTaskState, ExportError> {
        let state = self
            .tasks
            .get(ticket_set_id)?
            .ok_or_else(|| ExportError::TaskNotFound(ticket_set_id.to_string()))?;

        if state.status != ExportStatus::Failed {
            return Err(ExportError::NotRetryable {
                ticket_set_id: ticket_set_id.to_string(),
                status: state.status.to_string(),
            });
        }
        if !state.has_budget() {
            return Err(ExportError::RetryBudgetExhausted {
                ticket_set_id: ticket_set_id.to_string(),
                retry_count: state.retry_count,
                last_error: state
                    .failure_context
                    .map(|c| c.error)
                    .unwrap_or_default(),
            });
        }

        info!(ticket_set_id, retry_count = state.retry_count, "Retrying export");
        self.launch(ticket_set_id).await
    }

    /// Request cancellation of a running export.
    ///
    /// Takes effect at the next ticket boundary. Returns false if no export of
    /// the set is running in this process.
    pub fn cancel(&self, ticket_set_id: &str) -> bool {
        let flags = match self.cancellations.lock() {
            Ok(flags) => flags,
            Err(poisoned) => poisoned.into_inner(),
        };
        match flags.get(ticket_set_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!(ticket_set_id, "Export cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Close out run records left `running` by a previous process.
    ///
    /// Call once at startup, before accepting requests.
    pub async fn recover_interrupted(&self) -> Result<usize, ExportError> {
        let interrupted = self.tasks.fail_interrupted("interrupted")?;

        for state in &interrupted {
            warn!(
                ticket_set_id = %state.ticket_set_id,
                task_id = %state.task_id,
                "Export was interrupted by a restart; marked failed"
            );
            self.emit(AuditEvent::ExportInterrupted {
                ticket_set_id: state.ticket_set_id.clone(),
                task_id: state.task_id.clone(),
            })
            .await;
        }

        Ok(interrupted.len())
    }

    /// The run record of a ticket set.
    pub fn status(&self, ticket_set_id: &str) -> Result<Option<ExportTaskState>, ExportError> {
        Ok(self.tasks.get(ticket_set_id)?)
    }

    /// Current in-process phase of a ticket set.
    pub async fn phase(&self, ticket_set_id: &str) -> ExportPhase {
        self.phases
            .read()
            .await
            .get(ticket_set_id)
            .copied()
            .unwrap_or(ExportPhase::Idle)
    }

    /// Whether the set is currently allowed to export, per the validation gate.
    pub fn check_gate(&self, ticket_set_id: &str) -> Result<(), ExportError> {
        let record = self.validations.get(ticket_set_id)?;
        check_export_allowed(record.as_ref()).map_err(ExportError::from)
    }

    // =========================================================================
    // Run
    // =========================================================================

    async fn run(
        &self,
        mut task: ExportTaskState,
        cancel: Arc<AtomicBool>,
    ) -> Result<ExportSummary, ExportError> {
        let set_id = task.ticket_set_id.clone();
        let started = Instant::now();

        let mut counters = RunCounters::default();
        let result = self.run_attempts(&mut task, &cancel, &mut counters).await;

        self.unregister_cancel(&set_id, &cancel);

        let label = match &result {
            Ok(summary) => summary.status.as_str(),
            Err(ExportError::Blocked(_)) | Err(ExportError::Cycle(_)) => "blocked",
            Err(_) => "failed",
        };
        metrics::EXPORT_RUNS.with_label_values(&[label]).inc();
        metrics::EXPORT_DURATION
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());

        // Storage errors escape before the record is updated; never leave it running.
        if let Err(e) = &result {
            if task.status == ExportStatus::Running {
                error!(ticket_set_id = %set_id, "Export aborted: {}", e);
                // A previous attempt of this run may already have created tickets.
                let (last_ticket_index, processed_keys) = task
                    .failure_context
                    .as_ref()
                    .map(|c| (c.last_ticket_index, c.processed_keys.clone()))
                    .unwrap_or_default();
                task.mark_blocked(FailureContext {
                    last_ticket_index,
                    processed_keys,
                    error: e.to_string(),
                    category: e.category(),
                    failed_ticket_id: None,
                });
                if let Err(save_err) = self.tasks.save(&task) {
                    error!(ticket_set_id = %set_id, "Failed to record export failure: {}", save_err);
                }
                self.set_phase_forced(&set_id, ExportPhase::Failed).await;
            }
        }

        result
    }

    async fn run_attempts(
        &self,
        task: &mut ExportTaskState,
        cancel: &AtomicBool,
        counters: &mut RunCounters,
    ) -> Result<ExportSummary, ExportError> {
        let set_id = task.ticket_set_id.clone();

        loop {
            counters.attempts += 1;
            metrics::EXPORT_ATTEMPTS.inc();

            // VALIDATING
            self.set_phase(&set_id, ExportPhase::Validating).await?;
            self.publish(ProgressUpdate::new(&set_id, 0.0, "Validating")).await;
            if let Err(e) = self.check_gate(&set_id) {
                return Err(self.fail_before_export(task, e).await);
            }
            if cancel.load(Ordering::SeqCst) {
                return self.finish_cancelled(task, counters, 0).await;
            }

            // ORDERING
            self.set_phase(&set_id, ExportPhase::Ordering).await?;
            let ready = self.tickets.list_export_ready(&set_id)?;
            let edges = self.tickets.list_edges(&set_id)?;
            let graph = DependencyGraph::from_edges(&edges);
            let ordered = match graph.topological_order(ready) {
                Ok(ordered) => ordered,
                Err(cycle) => return Err(self.fail_before_export(task, cycle.into()).await),
            };

            let resume = ExportProgressTracker::compute_resume_point(&ordered);
            counters.total = resume.total;
            if counters.attempts == 1 {
                counters.skipped = resume.done.len();
            }

            info!(
                ticket_set_id = %set_id,
                task_id = %task.task_id,
                attempt = task.retry_count + 1,
                total = resume.total,
                already_exported = resume.done.len(),
                "Starting export"
            );
            self.emit(AuditEvent::ExportStarted {
                ticket_set_id: set_id.clone(),
                task_id: task.task_id.clone(),
                attempt: task.retry_count + 1,
                total_tickets: resume.total,
                already_exported: resume.done.len(),
            })
            .await;

            // EXPORTING
            self.set_phase(&set_id, ExportPhase::Exporting).await?;
            let mut cursor = Cursor::default();
            let outcome = self
                .export_tickets(&set_id, &graph, &ordered, cancel, &mut cursor, counters)
                .await;

            match outcome {
                Ok(AttemptOutcome::Completed) => {
                    return self.finish_completed(task, counters).await;
                }
                Ok(AttemptOutcome::Cancelled) => {
                    let exported = cursor.processed_keys.len();
                    return self.finish_cancelled(task, counters, exported).await;
                }
                Err(err @ ExportError::Client { .. }) => {
                    let retry_after = match &err {
                        ExportError::Client {
                            source: ExternalError::RateLimited { retry_after_ms },
                            ..
                        } => *retry_after_ms,
                        _ => None,
                    };
                    let failed_ticket_id = match &err {
                        ExportError::Client { ticket_id, .. } => Some(ticket_id.clone()),
                        _ => None,
                    };

                    self.set_phase(&set_id, ExportPhase::Failed).await?;
                    task.record_failed_attempt(FailureContext {
                        last_ticket_index: cursor.last_ticket_index,
                        processed_keys: cursor.processed_keys,
                        error: err.to_string(),
                        category: err.category(),
                        failed_ticket_id,
                    });
                    let will_retry = err.is_transient() && task.has_budget();
                    // The record stays running through the backoff so the set cannot be claimed twice.
                    if !will_retry {
                        task.release_failed();
                    }
                    self.tasks.save(task)?;

                    error!(
                        ticket_set_id = %set_id,
                        retry_count = task.retry_count,
                        will_retry,
                        "Export attempt failed: {}",
                        err
                    );
                    self.emit(AuditEvent::ExportFailed {
                        ticket_set_id: set_id.clone(),
                        task_id: task.task_id.clone(),
                        error: err.to_string(),
                        category: err.category().as_str().to_string(),
                        retry_count: task.retry_count,
                        will_retry,
                    })
                    .await;

                    if will_retry {
                        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);
                        if let Some(ms) = retry_after {
                            let server_wait = Duration::from_millis(ms);
                            self.pacer.defer(server_wait).await;
                            backoff = backoff.max(server_wait);
                        }
                        self.publish(
                            ProgressUpdate::new(&set_id, self.retry_percent(counters, task), "Waiting to retry")
                                .with_detail("retry_in_ms", backoff.as_millis() as u64)
                                .with_detail("retry_count", task.retry_count),
                        )
                        .await;
                        tokio::time::sleep(backoff).await;

                        if cancel.load(Ordering::SeqCst) {
                            let exported = task
                                .failure_context
                                .as_ref()
                                .map(|c| c.processed_keys.len())
                                .unwrap_or(0);
                            return self.finish_cancelled(task, counters, exported).await;
                        }

                        continue;
                    }

                    if err.is_transient() {
                        return Err(ExportError::RetryBudgetExhausted {
                            ticket_set_id: set_id,
                            retry_count: task.retry_count,
                            last_error: err.to_string(),
                        });
                    }
                    return Err(err);
                }
                Err(other) => return Err(self.fail_mid_export(task, other, cursor).await),
            }
        }
    }

    /// Create every not-yet-exported ticket in order.
    ///
    /// Returns a `Client` error only for a failed `create_ticket`; attachment and
    /// link failures are recorded as manual fixes.
    async fn export_tickets(
        &self,
        set_id: &str,
        graph: &DependencyGraph,
        ordered: &[TicketNode],
        cancel: &AtomicBool,
        cursor: &mut Cursor,
        counters: &mut RunCounters,
    ) -> Result<AttemptOutcome, ExportError> {
        let total = ordered.len();
        let threshold = self.config.attachment_threshold_chars;
        let mut keys: HashMap<String, String> = HashMap::new();

        for (index, ticket) in ordered.iter().enumerate() {
            if let Some(key) = ticket.external_key() {
                keys.insert(ticket.id.clone(), key.to_string());
                cursor.processed_keys.push(key.to_string());
                cursor.last_ticket_index = Some(index);
                continue;
            }

            if cancel.load(Ordering::SeqCst) {
                return Ok(AttemptOutcome::Cancelled);
            }

            // 1. create
            let body = ticket.export_body(threshold);
            let truncated = ticket.needs_attachment(threshold);
            let created = self
                .call("create_ticket", self.client.create_ticket(&ticket.title, &body))
                .await
                .map_err(|source| ExportError::Client {
                    index,
                    ticket_id: ticket.id.clone(),
                    source,
                })?;
            self.persist_created(ticket, &created)?;
            counters.created += 1;
            metrics::TICKETS_CREATED.inc();
            if truncated {
                metrics::BODIES_TRUNCATED.inc();
            }
            info!(
                ticket_set_id = set_id,
                ticket_id = %ticket.id,
                key = %created.key,
                position = index + 1,
                total,
                "Created external ticket"
            );
            self.emit(AuditEvent::TicketExported {
                ticket_set_id: set_id.to_string(),
                ticket_id: ticket.id.clone(),
                external_key: created.key.clone(),
                external_url: created.url.clone(),
                truncated,
            })
            .await;

            keys.insert(ticket.id.clone(), created.key.clone());
            cursor.processed_keys.push(created.key.clone());
            cursor.last_ticket_index = Some(index);

            // 2. attachments
            for attachment in ticket.export_attachments(threshold) {
                // The ticket keeps one attachment record: the upstream one, or the
                // synthesized full body when there is none.
                let tracked = match &ticket.attachment {
                    Some(upstream) => upstream.filename == attachment.filename,
                    None => {
                        if let Err(e) = self.tickets.set_attachment(
                            &ticket.id,
                            &attachment.filename,
                            &attachment.content,
                        ) {
                            warn!(ticket_id = %ticket.id, "Failed to store attachment locally: {}", e);
                        }
                        true
                    }
                };
                let upload = self
                    .call(
                        "upload_attachment",
                        self.client.upload_attachment(
                            &created.key,
                            &attachment.filename,
                            attachment.content.as_bytes(),
                        ),
                    )
                    .await;
                match upload {
                    Ok(()) => {
                        if tracked {
                            self.store_attachment_status(&ticket.id, AttachmentUploadStatus::Uploaded);
                        }
                    }
                    Err(e) => {
                        if tracked {
                            self.store_attachment_status(&ticket.id, AttachmentUploadStatus::Failed);
                        }
                        let fix = NewManualFix::attachment_upload(
                            set_id,
                            &ticket.id,
                            &created.key,
                            &attachment.filename,
                            e.to_string(),
                        );
                        self.record_manual_fix(fix, counters).await;
                    }
                }
            }

            // 3. links
            for dependency in graph.dependencies_of(&ticket.id) {
                let target_key = match self.key_of(dependency, &keys) {
                    Ok(Some(key)) => key,
                    Ok(None) => {
                        debug!(
                            ticket_id = %ticket.id,
                            dependency,
                            "Dependency has no external ticket; skipping link"
                        );
                        continue;
                    }
                    Err(e) => {
                        warn!(ticket_id = %ticket.id, dependency, "Failed to look up dependency key: {}", e);
                        let fix = NewManualFix::dependency_link(
                            set_id,
                            &ticket.id,
                            &created.key,
                            &format!("the ticket exported for {}", dependency),
                            e.to_string(),
                        );
                        self.record_manual_fix(fix, counters).await;
                        continue;
                    }
                };
                let link = self
                    .call(
                        "create_link",
                        self.client.create_link(&created.key, &target_key),
                    )
                    .await;
                if let Err(e) = link {
                    let fix = NewManualFix::dependency_link(
                        set_id,
                        &ticket.id,
                        &created.key,
                        &target_key,
                        e.to_string(),
                    );
                    self.record_manual_fix(fix, counters).await;
                }
            }

            // 4. progress
            let exported = cursor.processed_keys.len();
            self.publish(
                ProgressUpdate::new(set_id, percent(exported, total), "Exporting tickets")
                    .with_detail("current_title", ticket.title.clone())
                    .with_detail("exported", exported)
                    .with_detail("total", total)
                    .with_detail("manual_fixes", counters.manual_fixes),
            )
            .await;
        }

        Ok(AttemptOutcome::Completed)
    }

    // =========================================================================
    // Terminal transitions
    // =========================================================================

    async fn finish_completed(
        &self,
        task: &mut ExportTaskState,
        counters: &RunCounters,
    ) -> Result<ExportSummary, ExportError> {
        let set_id = task.ticket_set_id.clone();
        self.set_phase(&set_id, ExportPhase::Completed).await?;
        task.mark_completed();
        self.tasks.save(task)?;

        let duration_ms = task
            .completed_at
            .map(|end| (end - task.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        info!(
            ticket_set_id = %set_id,
            created = counters.created,
            skipped = counters.skipped,
            manual_fixes = counters.manual_fixes,
            "Export completed"
        );
        self.emit(AuditEvent::ExportCompleted {
            ticket_set_id: set_id.clone(),
            task_id: task.task_id.clone(),
            created: counters.created,
            skipped: counters.skipped,
            manual_fixes: counters.manual_fixes,
            duration_ms,
        })
        .await;
        self.publish(
            ProgressUpdate::new(&set_id, 100.0, "Completed")
                .with_detail("exported", counters.total)
                .with_detail("total", counters.total)
                .with_detail("manual_fixes", counters.manual_fixes),
        )
        .await;

        Ok(summary(task, counters))
    }

    async fn finish_cancelled(
        &self,
        task: &mut ExportTaskState,
        counters: &RunCounters,
        exported: usize,
    ) -> Result<ExportSummary, ExportError> {
        let set_id = task.ticket_set_id.clone();
        self.set_phase_forced(&set_id, ExportPhase::Cancelled).await;
        task.mark_cancelled();
        self.tasks.save(task)?;

        info!(ticket_set_id = %set_id, exported, "Export cancelled");
        self.emit(AuditEvent::ExportCancelled {
            ticket_set_id: set_id.clone(),
            task_id: task.task_id.clone(),
            exported,
        })
        .await;
        self.publish(
            ProgressUpdate::new(&set_id, percent(exported, counters.total), "Cancelled")
                .with_detail("exported", exported)
                .with_detail("total", counters.total),
        )
        .await;

        Ok(summary(task, counters))
    }

    /// Record a gate or ordering failure. Does not consume retry budget.
    async fn fail_before_export(&self, task: &mut ExportTaskState, err: ExportError) -> ExportError {
        let set_id = task.ticket_set_id.clone();
        warn!(ticket_set_id = %set_id, "Export blocked: {}", err);

        self.set_phase_forced(&set_id, ExportPhase::Failed).await;
        task.mark_blocked(FailureContext {
            last_ticket_index: None,
            processed_keys: Vec::new(),
            error: err.to_string(),
            category: err.category(),
            failed_ticket_id: None,
        });
        if let Err(e) = self.tasks.save(task) {
            error!(ticket_set_id = %set_id, "Failed to record blocked export: {}", e);
        }

        self.record_blocked(&set_id, &err).await;
        err
    }

    /// Record a run-stopping error raised after external calls were made, keeping
    /// the cursor of tickets already created.
    async fn fail_mid_export(
        &self,
        task: &mut ExportTaskState,
        err: ExportError,
        cursor: Cursor,
    ) -> ExportError {
        let set_id = task.ticket_set_id.clone();
        error!(
            ticket_set_id = %set_id,
            exported = cursor.processed_keys.len(),
            "Export attempt aborted: {}",
            err
        );

        self.set_phase_forced(&set_id, ExportPhase::Failed).await;
        task.mark_failed(FailureContext {
            last_ticket_index: cursor.last_ticket_index,
            processed_keys: cursor.processed_keys,
            error: err.to_string(),
            category: err.category(),
            failed_ticket_id: None,
        });
        if let Err(e) = self.tasks.save(task) {
            error!(ticket_set_id = %set_id, "Failed to record export failure: {}", e);
        }

        self.emit(AuditEvent::ExportFailed {
            ticket_set_id: set_id,
            task_id: task.task_id.clone(),
            error: err.to_string(),
            category: err.category().as_str().to_string(),
            retry_count: task.retry_count,
            will_retry: false,
        })
        .await;
        err
    }

    async fn record_blocked(&self, set_id: &str, err: &ExportError) {
        self.emit(AuditEvent::ExportBlocked {
            ticket_set_id: set_id.to_string(),
            reason: err.to_string(),
        })
        .await;
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Pace, time and count one external call.
    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, ExternalError>>,
    ) -> Result<T, ExternalError> {
        self.pacer.acquire().await;
        let started = Instant::now();
        let result = fut.await;
        metrics::EXTERNAL_CALL_DURATION
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
        let status = match &result {
            Ok(_) => "success",
            Err(e) if e.is_transient() => "transient",
            Err(_) => "error",
        };
        metrics::EXTERNAL_CALLS
            .with_label_values(&[operation, status])
            .inc();
        if let Err(e) = &result {
            debug!(operation, "External call failed: {}", e);
        }
        result
    }

    /// Persist the external reference before anything else can fail.
    fn persist_created(&self, ticket: &TicketNode, created: &CreatedTicket) -> Result<(), ExportError> {
        let external = ExternalRef {
            key: created.key.clone(),
            url: created.url.clone(),
        };
        self.tickets
            .set_external_ref(&ticket.id, &external)
            .map_err(|e| {
                error!(
                    ticket_id = %ticket.id,
                    key = %created.key,
                    "Created external ticket but failed to store its key: {}",
                    e
                );
                ExportError::from(e)
            })
    }

    /// Local bookkeeping only; the upload outcome is already decided.
    fn store_attachment_status(&self, ticket_id: &str, status: AttachmentUploadStatus) {
        if let Err(e) = self.tickets.set_attachment_status(ticket_id, status) {
            warn!(ticket_id, ?status, "Failed to store attachment status: {}", e);
        }
    }

    /// External key of a dependency target, looked up in this run first, then in the store.
    fn key_of(
        &self,
        ticket_id: &str,
        keys: &HashMap<String, String>,
    ) -> Result<Option<String>, ExportError> {
        if let Some(key) = keys.get(ticket_id) {
            return Ok(Some(key.clone()));
        }
        Ok(self
            .tickets
            .get(ticket_id)?
            .and_then(|t| t.external.map(|r| r.key)))
    }

    async fn record_manual_fix(&self, fix: NewManualFix, counters: &mut RunCounters) {
        counters.manual_fixes += 1;
        metrics::MANUAL_FIXES
            .with_label_values(&[fix.fix_type.as_str()])
            .inc();

        let event = AuditEvent::ManualFixRecorded {
            ticket_set_id: fix.ticket_set_id.clone(),
            ticket_id: fix.ticket_id.clone(),
            fix_type: fix.fix_type.as_str().to_string(),
            external_key: fix.external_key.clone(),
            error: fix.error.clone(),
        };
        if let Err(e) = self.manual_fixes.append(fix) {
            error!("Failed to store manual fix: {}", e);
        }
        self.emit(event).await;
    }

    async fn publish(&self, update: ProgressUpdate) {
        if let Err(e) = self.sink.publish(update).await {
            warn!("Failed to publish export progress: {}", e);
        }
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }

    fn retry_percent(&self, counters: &RunCounters, task: &ExportTaskState) -> f32 {
        let exported = task
            .failure_context
            .as_ref()
            .map(|c| c.processed_keys.len())
            .unwrap_or(0);
        percent(exported, counters.total)
    }

    async fn set_phase(&self, set_id: &str, next: ExportPhase) -> Result<(), ExportError> {
        let mut phases = self.phases.write().await;
        let current = phases.get(set_id).copied().unwrap_or(ExportPhase::Idle);
        if !current.can_transition_to(next) {
            return Err(ExportError::InvalidTransition {
                from: current.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        debug!(ticket_set_id = set_id, from = current.as_str(), to = next.as_str(), "Export phase");
        phases.insert(set_id.to_string(), next);
        Ok(())
    }

    /// Move to a terminal phase from wherever the run stopped.
    async fn set_phase_forced(&self, set_id: &str, next: ExportPhase) {
        self.phases.write().await.insert(set_id.to_string(), next);
    }

    fn register_cancel(&self, set_id: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut flags = match self.cancellations.lock() {
            Ok(flags) => flags,
            Err(poisoned) => poisoned.into_inner(),
        };
        flags.insert(set_id.to_string(), Arc::clone(&flag));
        flag
    }

    /// Drop `flag` unless a newer run of the same set has replaced it.
    fn unregister_cancel(&self, set_id: &str, flag: &Arc<AtomicBool>) {
        let mut flags = match self.cancellations.lock() {
            Ok(flags) => flags,
            Err(poisoned) => poisoned.into_inner(),
        };
        if flags.get(set_id).is_some_and(|current| Arc::ptr_eq(current, flag)) {
            flags.remove(set_id);
        }
    }
}

fn percent(done: usize, total: usize) -> f32 {
    if total == 0 {
        100.0
    } else {
        done as f32 / total as f32 * 100.0
    }
}

fn summary(task: &ExportTaskState, counters: &RunCounters) -> ExportSummary {
    ExportSummary {
        ticket_set_id: task.ticket_set_id.clone(),
        task_id: task.task_id.clone(),
        status: task.status,
        total: counters.total,
        created: counters.created,
        skipped: counters.skipped,
        manual_fixes: counters.manual_fixes,
        attempts: counters.attempts,
    }
}
