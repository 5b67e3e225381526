//! Ticket and dependency API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{
    graph::EdgeInsertion,
    ticket::{AttachmentUploadStatus, EntityGroup, ExternalRef},
    AuditEvent, DependencyEdge, DependencyGraph, EdgeRejection, TicketNode,
};

use super::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for adding or removing a dependency.
#[derive(Debug, Deserialize)]
pub struct DependencyBody {
    /// The dependent ticket.
    pub from: String,
    /// The ticket it depends on.
    pub to: String,
}

/// Response for ticket listings
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub id: String,
    pub title: String,
    pub entity_group: EntityGroup,
    pub user_order: i64,
    pub ready_for_export: bool,
    pub character_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_status: Option<AttachmentUploadStatus>,
    /// Ids of the tickets this one depends on.
    pub depends_on: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TicketResponse {
    fn new(ticket: TicketNode, depends_on: Vec<String>) -> Self {
        Self {
            character_count: ticket.character_count(),
            attachment_status: ticket.attachment.as_ref().map(|a| a.upload_status),
            id: ticket.id,
            title: ticket.title,
            entity_group: ticket.entity_group,
            user_order: ticket.user_order,
            ready_for_export: ticket.ready_for_export,
            external: ticket.external,
            depends_on,
            created_at: ticket.created_at.to_rfc3339(),
            updated_at: ticket.updated_at.to_rfc3339(),
        }
    }
}

/// Response for listing tickets
#[derive(Debug, Serialize)]
pub struct ListTicketsResponse {
    pub tickets: Vec<TicketResponse>,
    pub total: usize,
    pub exported: usize,
}

/// Response for a dependency change
#[derive(Debug, Serialize)]
pub struct DependencyResponse {
    pub from: String,
    pub to: String,
    pub result: &'static str,
}

/// Response when a dependency is refused
#[derive(Debug, Serialize)]
pub struct DependencyRejectedResponse {
    pub error: String,
    pub category: &'static str,
    pub rejection: EdgeRejection,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the tickets of a ticket set with their dependencies
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Path(set_id): Path<String>,
) -> Result<Json<ListTicketsResponse>, ApiError> {
    let tickets = state.tickets().list_for_set(&set_id)?;
    let edges = state.tickets().list_edges(&set_id)?;

    let mut depends_on: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for edge in edges {
        depends_on.entry(edge.from).or_default().push(edge.to);
    }

    let exported = tickets.iter().filter(|t| t.is_exported()).count();
    let tickets: Vec<TicketResponse> = tickets
        .into_iter()
        .map(|t| {
            let deps = depends_on.remove(&t.id).unwrap_or_default();
            TicketResponse::new(t, deps)
        })
        .collect();

    Ok(Json(ListTicketsResponse {
        total: tickets.len(),
        exported,
        tickets,
    }))
}

/// Add a dependency, refusing self-edges and edges that would close a cycle
pub async fn add_dependency(
    State(state): State<Arc<AppState>>,
    Path(set_id): Path<String>,
    Json(body): Json<DependencyBody>,
) -> Result<Response, ApiError> {
    ensure_in_set(&state, &set_id, &body.from)?;
    ensure_in_set(&state, &set_id, &body.to)?;

    let edges = state.tickets().list_edges(&set_id)?;
    let mut graph = DependencyGraph::from_edges(&edges);

    match graph.add_edge(&body.from, &body.to) {
        Ok(EdgeInsertion::Added) => {
            state
                .tickets()
                .add_edge(&set_id, &DependencyEdge::new(&body.from, &body.to))?;
            state.audit().try_emit(AuditEvent::DependencyAdded {
                ticket_set_id: set_id.clone(),
                from: body.from.clone(),
                to: body.to.clone(),
            });
            tracing::info!(ticket_set_id = %set_id, from = %body.from, to = %body.to, "Dependency added");
            Ok((
                StatusCode::CREATED,
                Json(DependencyResponse {
                    from: body.from,
                    to: body.to,
                    result: "added",
                }),
            )
                .into_response())
        }
        Ok(EdgeInsertion::AlreadyPresent) => Ok(Json(DependencyResponse {
            from: body.from,
            to: body.to,
            result: "already_present",
        })
        .into_response()),
        Err(rejection) => {
            state.audit().try_emit(AuditEvent::DependencyRejected {
                ticket_set_id: set_id.clone(),
                from: body.from.clone(),
                to: body.to.clone(),
                reason: rejection.to_string(),
            });
            tracing::info!(ticket_set_id = %set_id, "Dependency rejected: {}", rejection);
            Ok((
                StatusCode::CONFLICT,
                Json(DependencyRejectedResponse {
                    error: rejection.to_string(),
                    category: "user_fixable",
                    rejection,
                }),
            )
                .into_response())
        }
    }
}

/// Remove a dependency
pub async fn remove_dependency(
    State(state): State<Arc<AppState>>,
    Path(set_id): Path<String>,
    Json(body): Json<DependencyBody>,
) -> Result<Json<DependencyResponse>, ApiError> {
    let removed = state
        .tickets()
        .remove_edge(&set_id, &DependencyEdge::new(&body.from, &body.to))?;
    if !removed {
        return Err(ApiError::not_found(format!(
            "no dependency {} -> {} in ticket set {}",
            body.from, body.to, set_id
        )));
    }

    state.audit().try_emit(AuditEvent::DependencyRemoved {
        ticket_set_id: set_id.clone(),
        from: body.from.clone(),
        to: body.to.clone(),
    });

    Ok(Json(DependencyResponse {
        from: body.from,
        to: body.to,
        result: "removed",
    }))
}

fn ensure_in_set(state: &AppState, set_id: &str, ticket_id: &str) -> Result<(), ApiError> {
    let ticket = state
        .tickets()
        .get(ticket_id)?
        .ok_or_else(|| ApiError::not_found(format!("Ticket not found: {}", ticket_id)))?;
    if ticket.ticket_set_id != set_id {
        return Err(ApiError::bad_request(format!(
            "ticket {} belongs to ticket set {}, not {}",
            ticket_id, ticket.ticket_set_id, set_id
        )));
    }
    Ok(())
}
