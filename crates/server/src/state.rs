use std::sync::Arc;
use tessera_core::{
    AuditHandle, AuditStore, BroadcastProgressSink, Config, ExportOrchestrator, ExportTaskStore,
    ManualFixRegistry, SanitizedConfig, TicketStore, ValidationStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
    tickets: Arc<dyn TicketStore>,
    validations: Arc<dyn ValidationStore>,
    tasks: Arc<dyn ExportTaskStore>,
    manual_fixes: ManualFixRegistry,
    /// None when no external tracker is configured.
    orchestrator: Option<Arc<ExportOrchestrator>>,
    progress: BroadcastProgressSink,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
        tickets: Arc<dyn TicketStore>,
        validations: Arc<dyn ValidationStore>,
        tasks: Arc<dyn ExportTaskStore>,
        manual_fixes: ManualFixRegistry,
        orchestrator: Option<Arc<ExportOrchestrator>>,
        progress: BroadcastProgressSink,
    ) -> Self {
        Self {
            config,
            audit,
            audit_store,
            tickets,
            validations,
            tasks,
            manual_fixes,
            orchestrator,
            progress,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn tickets(&self) -> &dyn TicketStore {
        self.tickets.as_ref()
    }

    pub fn validations(&self) -> &dyn ValidationStore {
        self.validations.as_ref()
    }

    pub fn tasks(&self) -> &dyn ExportTaskStore {
        self.tasks.as_ref()
    }

    pub fn manual_fixes(&self) -> &ManualFixRegistry {
        &self.manual_fixes
    }

    pub fn orchestrator(&self) -> Option<&Arc<ExportOrchestrator>> {
        self.orchestrator.as_ref()
    }

    pub fn progress(&self) -> &BroadcastProgressSink {
        &self.progress
    }
}
