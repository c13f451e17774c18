//! Workspace endpoints: access resolution, settings updates, and deletion.
//!
//! Every handler resolves the caller's access first and renders "absent",
//! "soft-deleted", and "no relation" identically as 404, so responses never
//! confirm a workspace's existence to unauthorized callers.

use aerosol::axum::Dep;
use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, patch},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::{
    access::{self, AccessDecision, ActionAuthorization},
    api::{OPAQUE_ERROR, State},
    auth::{AuthenticatedUser, RawToken, WorkspaceRef, WorkspaceRole},
    db::Postgres,
    store::{WorkspaceSettings, WorkspaceStore},
};

pub fn router() -> Router<State> {
    Router::new()
        .route("/{slug}/access", get(get_access))
        .route("/{slug}", patch(update_settings))
        .route("/{slug}", delete(delete_workspace))
}

async fn authenticate(db: &Postgres, token: &RawToken) -> Result<AuthenticatedUser, StatusCode> {
    match db.validate(token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(err) => {
            error!(?err, "auth.validate.error");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// =============================================================================
// Access Resolution
// =============================================================================

/// The boundary contract consumed by every authorization-gated operation.
#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub role: WorkspaceRole,
    pub can_read: bool,
    pub can_write: bool,
    pub can_admin: bool,
}

/// Resolve the caller's effective role and capability flags.
///
/// ## Endpoint
/// ```
/// GET /api/v1/workspaces/{slug}/access
/// Authorization: Bearer <api_key>
/// ```
///
/// ## Responses
/// - 200: Role and capability flags
/// - 401: Not authenticated
/// - 404: Workspace not found (or not visible to the caller)
#[tracing::instrument(skip(db, token))]
pub async fn get_access(
    Dep(db): Dep<Postgres>,
    token: RawToken,
    Path(slug): Path<String>,
) -> GetAccessResponse {
    let user = match authenticate(&db, &token).await {
        Ok(user) => user,
        Err(status) => return GetAccessResponse::Status(status),
    };

    match access::resolve_access(&db, user.user_id, &WorkspaceRef::slug(&slug)).await {
        Ok(AccessDecision::Granted(grant)) => {
            info!(user_id = %user.user_id, role = %grant.role, "workspaces.access.resolved");
            GetAccessResponse::Success(AccessResponse {
                role: grant.role,
                can_read: grant.can_read,
                can_write: grant.can_write,
                can_admin: grant.can_admin,
            })
        }
        Ok(AccessDecision::NotFound) => GetAccessResponse::NotFound,
        Err(err) => {
            error!(?err, "workspaces.access.error");
            GetAccessResponse::Error
        }
    }
}

#[derive(Debug)]
pub enum GetAccessResponse {
    Success(AccessResponse),
    NotFound,
    Status(StatusCode),
    Error,
}

impl IntoResponse for GetAccessResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            GetAccessResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            GetAccessResponse::NotFound => {
                (StatusCode::NOT_FOUND, "Workspace not found").into_response()
            }
            GetAccessResponse::Status(status) => status.into_response(),
            GetAccessResponse::Error => {
                (StatusCode::INTERNAL_SERVER_ERROR, OPAQUE_ERROR).into_response()
            }
        }
    }
}

// =============================================================================
// Update Settings
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Update workspace settings.
///
/// Requires an admin-capable role. Deletion is deliberately *not* covered by
/// this check; see [`delete_workspace`].
///
/// ## Endpoint
/// ```
/// PATCH /api/v1/workspaces/{slug}
/// Authorization: Bearer <api_key>
/// Content-Type: application/json
///
/// { "name": "New Name", "description": "..." }
/// ```
///
/// ## Responses
/// - 204: Settings updated
/// - 400: Invalid request
/// - 401: Not authenticated
/// - 403: Caller's role cannot administer the workspace
/// - 404: Workspace not found (or not visible to the caller)
#[tracing::instrument(skip(db, token, request))]
pub async fn update_settings(
    Dep(db): Dep<Postgres>,
    token: RawToken,
    Path(slug): Path<String>,
    Json(request): Json<UpdateSettingsRequest>,
) -> UpdateSettingsResponse {
    let user = match authenticate(&db, &token).await {
        Ok(user) => user,
        Err(status) => return UpdateSettingsResponse::Status(status),
    };

    if let Some(name) = &request.name
        && name.trim().is_empty()
    {
        return UpdateSettingsResponse::BadRequest(String::from(
            "Workspace name cannot be empty",
        ));
    }

    let workspace =
        match access::authorize_settings_update(&db, user.user_id, &WorkspaceRef::slug(&slug))
            .await
        {
            Ok(ActionAuthorization::Granted { workspace, .. }) => workspace,
            Ok(ActionAuthorization::Forbidden { role }) => {
                warn!(user_id = %user.user_id, %role, "workspaces.update.forbidden");
                return UpdateSettingsResponse::Forbidden;
            }
            Ok(ActionAuthorization::NotFound) => return UpdateSettingsResponse::NotFound,
            Err(err) => {
                error!(?err, "workspaces.update.authorize_error");
                return UpdateSettingsResponse::Error;
            }
        };

    let settings = WorkspaceSettings {
        name: request.name,
        description: request.description,
    };
    match db.update_workspace_settings(workspace.id, &settings).await {
        Ok(()) => {
            info!(workspace_id = %workspace.id, "workspaces.update.success");
            UpdateSettingsResponse::Success
        }
        Err(err) => {
            error!(?err, "workspaces.update.error");
            UpdateSettingsResponse::Error
        }
    }
}

#[derive(Debug)]
pub enum UpdateSettingsResponse {
    Success,
    BadRequest(String),
    Forbidden,
    NotFound,
    Status(StatusCode),
    Error,
}

impl IntoResponse for UpdateSettingsResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            UpdateSettingsResponse::Success => StatusCode::NO_CONTENT.into_response(),
            UpdateSettingsResponse::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, msg).into_response()
            }
            UpdateSettingsResponse::Forbidden => (
                StatusCode::FORBIDDEN,
                "Your role cannot update this workspace's settings",
            )
                .into_response(),
            UpdateSettingsResponse::NotFound => {
                (StatusCode::NOT_FOUND, "Workspace not found").into_response()
            }
            UpdateSettingsResponse::Status(status) => status.into_response(),
            UpdateSettingsResponse::Error => {
                (StatusCode::INTERNAL_SERVER_ERROR, OPAQUE_ERROR).into_response()
            }
        }
    }
}

// =============================================================================
// Delete Workspace
// =============================================================================

/// Soft-delete a workspace.
///
/// Strictly owner-only, deliberately stronger than the settings check; an admin can
/// rename a workspace but not delete it. The slug is renamed aside so it can
/// be reused, with the original recorded on the row.
///
/// ## Endpoint
/// ```
/// DELETE /api/v1/workspaces/{slug}
/// Authorization: Bearer <api_key>
/// ```
///
/// ## Responses
/// - 204: Workspace deleted
/// - 401: Not authenticated
/// - 403: Caller is not the owner
/// - 404: Workspace not found (or not visible to the caller)
#[tracing::instrument(skip(db, token))]
pub async fn delete_workspace(
    Dep(db): Dep<Postgres>,
    token: RawToken,
    Path(slug): Path<String>,
) -> DeleteWorkspaceResponse {
    let user = match authenticate(&db, &token).await {
        Ok(user) => user,
        Err(status) => return DeleteWorkspaceResponse::Status(status),
    };

    let workspace =
        match access::authorize_delete(&db, user.user_id, &WorkspaceRef::slug(&slug)).await {
            Ok(ActionAuthorization::Granted { workspace, .. }) => workspace,
            Ok(ActionAuthorization::Forbidden { role }) => {
                warn!(user_id = %user.user_id, %role, "workspaces.delete.forbidden");
                return DeleteWorkspaceResponse::Forbidden;
            }
            Ok(ActionAuthorization::NotFound) => return DeleteWorkspaceResponse::NotFound,
            Err(err) => {
                error!(?err, "workspaces.delete.authorize_error");
                return DeleteWorkspaceResponse::Error;
            }
        };

    let retired = access::retired_slug(&workspace.slug, OffsetDateTime::now_utc());
    match db.soft_delete_workspace(workspace.id, &retired).await {
        Ok(()) => {
            info!(workspace_id = %workspace.id, "workspaces.delete.success");
            DeleteWorkspaceResponse::Success
        }
        Err(err) => {
            error!(?err, "workspaces.delete.error");
            DeleteWorkspaceResponse::Error
        }
    }
}

#[derive(Debug)]
pub enum DeleteWorkspaceResponse {
    Success,
    Forbidden,
    NotFound,
    Status(StatusCode),
    Error,
}

impl IntoResponse for DeleteWorkspaceResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            DeleteWorkspaceResponse::Success => StatusCode::NO_CONTENT.into_response(),
            DeleteWorkspaceResponse::Forbidden => (
                StatusCode::FORBIDDEN,
                "Only the workspace owner can delete it",
            )
                .into_response(),
            DeleteWorkspaceResponse::NotFound => {
                (StatusCode::NOT_FOUND, "Workspace not found").into_response()
            }
            DeleteWorkspaceResponse::Status(status) => status.into_response(),
            DeleteWorkspaceResponse::Error => {
                (StatusCode::INTERNAL_SERVER_ERROR, OPAQUE_ERROR).into_response()
            }
        }
    }
}
