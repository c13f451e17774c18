//! Swarm provisioning and ingest webhook endpoints.

use aerosol::axum::Dep;
use axum::{
    Json, Router,
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    api::{OPAQUE_ERROR, State},
    auth::{RawToken, SwarmId, WorkspaceRef},
    db::Postgres,
    provisioning::{self, ApplyOutcome, IngestEvent},
    rate_limit,
    swarm::{CreateSwarmOutcome, SwarmProvisioner},
};

/// The correlation header accompanying ingest deliveries; stored verbatim
/// for audit.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router() -> Router<State> {
    Router::new()
        .route("/{swarm_id}/ingest/webhook", post(ingest_webhook))
        .layer(rate_limit::webhook())
}

/// Routes mounted under `/workspaces`.
pub fn workspace_router() -> Router<State> {
    Router::new()
        .route("/{slug}/swarm", post(create_swarm))
        .layer(rate_limit::provisioning())
}

// =============================================================================
// Create Swarm
// =============================================================================

#[derive(Debug, Serialize)]
pub struct CreateSwarmResponse {
    /// The local record id and nothing else. The remote API key, the
    /// generated password, and the secret alias are never echoed.
    pub swarm_id: i64,
}

/// Provision a swarm for the workspace.
///
/// ## Endpoint
/// ```
/// POST /api/v1/workspaces/{slug}/swarm
/// Authorization: Bearer <api_key>
/// ```
///
/// ## Responses
/// - 201: Swarm created; body carries only the local record id
/// - 401: Not authenticated
/// - 403: Caller's role cannot administer the workspace
/// - 404: Workspace not found (or not visible to the caller)
/// - 409: The workspace already has a swarm
/// - 502: The provisioning service rejected the request or was unreachable
#[tracing::instrument(skip(db, provisioner, token))]
pub async fn create_swarm(
    Dep(db): Dep<Postgres>,
    Dep(provisioner): Dep<SwarmProvisioner>,
    token: RawToken,
    Path(slug): Path<String>,
) -> CreateSwarmHttpResponse {
    let user = match db.validate(&token).await {
        Ok(Some(user)) => user,
        Ok(None) => return CreateSwarmHttpResponse::Unauthorized,
        Err(err) => {
            error!(?err, "swarms.create.auth_error");
            return CreateSwarmHttpResponse::Error;
        }
    };

    match provisioner
        .create(&db, user.user_id, &WorkspaceRef::slug(&slug))
        .await
    {
        Ok(CreateSwarmOutcome::Created { swarm_id }) => {
            info!(%swarm_id, "swarms.create.success");
            CreateSwarmHttpResponse::Created(CreateSwarmResponse {
                swarm_id: swarm_id.as_i64(),
            })
        }
        Ok(CreateSwarmOutcome::AlreadyExists) => CreateSwarmHttpResponse::Conflict,
        Ok(CreateSwarmOutcome::Forbidden { role }) => {
            warn!(%role, "swarms.create.forbidden");
            CreateSwarmHttpResponse::Forbidden
        }
        Ok(CreateSwarmOutcome::NotFound) => CreateSwarmHttpResponse::NotFound,
        Ok(CreateSwarmOutcome::RemoteFailed { status, message }) => {
            warn!(?status, "swarms.create.remote_failed");
            CreateSwarmHttpResponse::RemoteFailed { status, message }
        }
        Ok(CreateSwarmOutcome::PersistenceFailed) => CreateSwarmHttpResponse::Error,
        Err(err) => {
            error!(?err, "swarms.create.error");
            CreateSwarmHttpResponse::Error
        }
    }
}

#[derive(Debug)]
pub enum CreateSwarmHttpResponse {
    Created(CreateSwarmResponse),
    Conflict,
    Forbidden,
    NotFound,
    Unauthorized,
    RemoteFailed {
        status: Option<u16>,
        message: String,
    },
    Error,
}

impl IntoResponse for CreateSwarmHttpResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            CreateSwarmHttpResponse::Created(body) => {
                (StatusCode::CREATED, Json(body)).into_response()
            }
            CreateSwarmHttpResponse::Conflict => {
                (StatusCode::CONFLICT, "This workspace already has a swarm").into_response()
            }
            CreateSwarmHttpResponse::Forbidden => (
                StatusCode::FORBIDDEN,
                "Your role cannot provision infrastructure for this workspace",
            )
                .into_response(),
            CreateSwarmHttpResponse::NotFound => {
                (StatusCode::NOT_FOUND, "Workspace not found").into_response()
            }
            CreateSwarmHttpResponse::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
            CreateSwarmHttpResponse::RemoteFailed { status, message } => {
                let detail = match status {
                    Some(status) => format!("Provisioning failed ({status}): {message}"),
                    None => format!("Provisioning failed: {message}"),
                };
                (StatusCode::BAD_GATEWAY, detail).into_response()
            }
            CreateSwarmHttpResponse::Error => {
                (StatusCode::INTERNAL_SERVER_ERROR, OPAQUE_ERROR).into_response()
            }
        }
    }
}

// =============================================================================
// Ingest Webhook
// =============================================================================

/// Receive an ingestion progress delivery from the code-graph service.
///
/// Deliveries are idempotent whole-snapshot replacements; duplicates and
/// retries are safe. A processing failure is returned as 500 so the sender's
/// retry mechanism re-delivers.
///
/// ## Endpoint
/// ```
/// POST /api/v1/swarms/{swarm_id}/ingest/webhook
/// x-request-id: <correlation id>
/// Content-Type: application/json
///
/// { "request_id": "...", "status": "completed", "progress": 100, ... }
/// ```
///
/// ## Responses
/// - 204: Delivery applied
/// - 404: Unknown swarm
/// - 500: Processing failed; the sender should retry
#[tracing::instrument(skip(db, headers, event))]
pub async fn ingest_webhook(
    Dep(db): Dep<Postgres>,
    Path(swarm_id): Path<i64>,
    headers: HeaderMap,
    Json(event): Json<IngestEvent>,
) -> IngestWebhookResponse {
    let request_id_header = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match provisioning::apply_ingest_event(
        &db,
        SwarmId::from_i64(swarm_id),
        event,
        request_id_header,
    )
    .await
    {
        Ok(ApplyOutcome::Applied(snapshot)) => {
            info!(status = %snapshot.status, "swarms.ingest.applied");
            IngestWebhookResponse::Success
        }
        Ok(ApplyOutcome::SwarmNotFound) => IngestWebhookResponse::NotFound,
        Err(err) => {
            error!(?err, "swarms.ingest.error");
            IngestWebhookResponse::Error
        }
    }
}

#[derive(Debug)]
pub enum IngestWebhookResponse {
    Success,
    NotFound,
    Error,
}

impl IntoResponse for IngestWebhookResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            IngestWebhookResponse::Success => StatusCode::NO_CONTENT.into_response(),
            IngestWebhookResponse::NotFound => {
                (StatusCode::NOT_FOUND, "Swarm not found").into_response()
            }
            IngestWebhookResponse::Error => {
                (StatusCode::INTERNAL_SERVER_ERROR, OPAQUE_ERROR).into_response()
            }
        }
    }
}
