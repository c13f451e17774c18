//! Workspace access resolution.
//!
//! Every authorization-gated operation resolves the caller's effective role
//! here before doing anything else. The result deliberately collapses
//! "workspace does not exist", "workspace was deleted", and "caller has no
//! relation to it" into a single [`AccessDecision::NotFound`] so responses
//! cannot confirm a workspace's existence to outsiders. A distinct
//! `Forbidden` only appears once the caller has a visible relation and the
//! action demands a stronger role than held.

use time::OffsetDateTime;
use tracing::warn;

use crate::{
    auth::{UserId, WorkspaceRef, WorkspaceRole},
    store::{Workspace, WorkspaceStore},
};

/// The caller's effective role and derived capability flags.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct AccessGrant {
    pub role: WorkspaceRole,
    pub can_read: bool,
    pub can_write: bool,
    pub can_admin: bool,
}

impl AccessGrant {
    pub fn for_role(role: WorkspaceRole) -> Self {
        Self {
            role,
            can_read: role.can_read(),
            can_write: role.can_write(),
            can_admin: role.can_admin(),
        }
    }
}

/// The boundary shape consumed by authorization-gated operations: a grant,
/// or a not-found signal that hides whether the workspace exists at all.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AccessDecision {
    Granted(AccessGrant),
    /// Workspace absent, soft-deleted, or no ownership/membership relation.
    /// Callers must render these identically.
    NotFound,
}

/// Resolve the caller's access as the boundary [`AccessDecision`] shape.
pub async fn resolve_access<S: WorkspaceStore>(
    store: &S,
    user_id: UserId,
    workspace: &WorkspaceRef,
) -> color_eyre::Result<AccessDecision> {
    Ok(match resolve(store, user_id, workspace).await? {
        ActionAuthorization::Granted { grant, .. } => AccessDecision::Granted(grant),
        _ => AccessDecision::NotFound,
    })
}

/// Result of authorizing a specific action against a workspace.
#[derive(Clone, Debug)]
pub enum ActionAuthorization {
    Granted {
        workspace: Workspace,
        grant: AccessGrant,
    },
    /// The caller has a role in the workspace, but not a strong enough one.
    Forbidden { role: WorkspaceRole },
    NotFound,
}

/// Resolve the caller's effective role and capability flags.
///
/// Ownership wins over any membership rows that may also exist for the same
/// pair; a membership with non-null `left_at` confers nothing.
#[tracing::instrument(skip(store))]
pub async fn resolve<S: WorkspaceStore>(
    store: &S,
    user_id: UserId,
    workspace: &WorkspaceRef,
) -> color_eyre::Result<ActionAuthorization> {
    let Some(record) = store.workspace_by_ref(workspace).await? else {
        return Ok(ActionAuthorization::NotFound);
    };
    if record.deleted {
        return Ok(ActionAuthorization::NotFound);
    }

    if record.owner_id == user_id {
        let grant = AccessGrant::for_role(WorkspaceRole::Owner);
        return Ok(ActionAuthorization::Granted {
            workspace: record,
            grant,
        });
    }

    match store.active_membership(record.id, user_id).await? {
        Some(membership) => {
            let grant = AccessGrant::for_role(membership.role);
            Ok(ActionAuthorization::Granted {
                workspace: record,
                grant,
            })
        }
        None => Ok(ActionAuthorization::NotFound),
    }
}

/// Authorize a workspace settings update.
///
/// Requires `can_admin`. Note the asymmetry with [`authorize_delete`]: an
/// admin can rename a workspace but not delete it.
#[tracing::instrument(skip(store))]
pub async fn authorize_settings_update<S: WorkspaceStore>(
    store: &S,
    user_id: UserId,
    workspace: &WorkspaceRef,
) -> color_eyre::Result<ActionAuthorization> {
    match resolve(store, user_id, workspace).await? {
        ActionAuthorization::Granted { workspace, grant } if grant.can_admin => {
            Ok(ActionAuthorization::Granted { workspace, grant })
        }
        ActionAuthorization::Granted { grant, .. } => {
            warn!(role = %grant.role, "access.settings_update.denied");
            Ok(ActionAuthorization::Forbidden { role: grant.role })
        }
        other => Ok(other),
    }
}

/// Authorize a workspace deletion.
///
/// Strictly owner-only; this is intentionally stronger than `can_admin`.
#[tracing::instrument(skip(store))]
pub async fn authorize_delete<S: WorkspaceStore>(
    store: &S,
    user_id: UserId,
    workspace: &WorkspaceRef,
) -> color_eyre::Result<ActionAuthorization> {
    match resolve(store, user_id, workspace).await? {
        ActionAuthorization::Granted { workspace, grant }
            if grant.role == WorkspaceRole::Owner =>
        {
            Ok(ActionAuthorization::Granted { workspace, grant })
        }
        ActionAuthorization::Granted { grant, .. } => {
            warn!(role = %grant.role, "access.delete.denied");
            Ok(ActionAuthorization::Forbidden { role: grant.role })
        }
        other => Ok(other),
    }
}

/// The slug a workspace is moved to on soft delete, freeing the original
/// for reuse.
pub fn retired_slug(slug: &str, now: OffsetDateTime) -> String {
    format!("{slug}-deleted-{}", now.unix_timestamp())
}
