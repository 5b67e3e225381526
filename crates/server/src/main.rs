use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tessera_core::{
    create_audit_system, load_config, validate_config, AuditEvent, AuditStore,
    BroadcastProgressSink, ExportOrchestrator, ExportTaskStore, ExternalTicketClient, JiraClient,
    ManualFixRegistry, ProgressSink, SqliteAuditStore, SqliteExportTaskStore,
    SqliteManualFixStore, SqliteTicketStore, SqliteValidationStore, TicketStore, ValidationStore,
};
use tessera_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("TESSERA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    // Compute config hash for audit; the sanitized form keeps the token out of it
    let config_json =
        serde_json::to_string(&tessera_core::SanitizedConfig::from(&config)).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Stores
    let db_path = &config.database.path;
    let audit_store: Arc<dyn AuditStore> =
        Arc::new(SqliteAuditStore::new(db_path).context("Failed to create audit store")?);
    let tickets: Arc<dyn TicketStore> =
        Arc::new(SqliteTicketStore::new(db_path).context("Failed to create ticket store")?);
    let validations: Arc<dyn ValidationStore> = Arc::new(
        SqliteValidationStore::new(db_path).context("Failed to create validation store")?,
    );
    let tasks: Arc<dyn ExportTaskStore> = Arc::new(
        SqliteExportTaskStore::new(db_path).context("Failed to create export task store")?,
    );
    let manual_fixes = ManualFixRegistry::new(Arc::new(
        SqliteManualFixStore::new(db_path).context("Failed to create manual fix store")?,
    ));
    info!("Stores initialized");

    // Audit system
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;

    let progress = BroadcastProgressSink::new(config.export.progress_buffer);

    // Export orchestrator, only with a tracker to export to
    let orchestrator = match &config.jira {
        Some(jira_config) => {
            info!(
                "Initializing Jira client for project {} at {}",
                jira_config.project_key, jira_config.base_url
            );
            let client: Arc<dyn ExternalTicketClient> =
                Arc::new(JiraClient::new(jira_config).context("Failed to create Jira client")?);

            let orchestrator = ExportOrchestrator::new(
                config.export.clone(),
                Arc::clone(&tickets),
                Arc::clone(&validations),
                Arc::clone(&tasks),
                manual_fixes.clone(),
                client,
                Arc::new(progress.clone()) as Arc<dyn ProgressSink>,
            )
            .with_audit(audit_handle.clone());

            let recovered = orchestrator
                .recover_interrupted()
                .await
                .context("Failed to recover interrupted exports")?;
            if recovered > 0 {
                warn!("Marked {} interrupted export(s) as failed", recovered);
            }

            Some(Arc::new(orchestrator))
        }
        None => {
            warn!("No [jira] section configured; exports are disabled");
            None
        }
    };

    let state = Arc::new(AppState::new(
        config.clone(),
        audit_handle.clone(),
        audit_store,
        tickets,
        validations,
        tasks,
        manual_fixes,
        orchestrator,
        progress,
    ));

    let app = create_router(Arc::clone(&state));

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer exits once every AuditHandle is gone. Background exports
    // still running hold the orchestrator, and with it a handle, so the
    // writer is only given a bounded time to drain.
    drop(state);
    drop(audit_handle);

    match tokio::time::timeout(std::time::Duration::from_secs(5), writer_handle).await {
        Ok(_) => info!("Audit writer stopped"),
        Err(_) => warn!("Audit writer did not stop in time; exports still running are marked interrupted on next start"),
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
