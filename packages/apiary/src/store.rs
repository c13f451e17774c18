//! Data-access traits and the records they traffic in.
//!
//! The core components (access resolution, credential resolution, swarm
//! provisioning, ingest reconciliation) are written against these traits so
//! they can be exercised without a running database. [`crate::db::Postgres`]
//! is the production implementation; the integration tests provide an
//! in-memory one.
//!
//! # Serialization/Deserialization
//!
//! Record types in this module do not implement `Serialize` or `Deserialize`
//! because they are internal implementation details. Public-facing types
//! live next to the handlers that expose them.

use async_trait::async_trait;
use color_eyre::Result;
use derive_more::Debug;
use time::OffsetDateTime;

use crate::{
    auth::{SourceControlOrgId, SwarmId, UserId, WorkspaceId, WorkspaceRef, WorkspaceRole},
    provisioning::{StepStatus, WizardStep},
};

/// A user account record.
#[derive(Clone, Debug)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub deleted: bool,
    pub created_at: OffsetDateTime,
}

/// A workspace record.
///
/// `deleted` workspaces keep their row; deletion renames the slug (freeing
/// the original for reuse) and records the pre-deletion value in
/// `original_slug`.
#[derive(Clone, Debug)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub slug: String,
    pub original_slug: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: UserId,
    pub source_control_org_id: Option<SourceControlOrgId>,
    pub deleted: bool,
    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// A workspace membership row.
///
/// The owner is not represented here; ownership is derived from
/// [`Workspace::owner_id`]. A row with non-null `left_at` confers no access.
#[derive(Clone, Debug)]
pub struct WorkspaceMembership {
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
    pub role: WorkspaceRole,
    pub left_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// A third-party provider credential row.
///
/// A user normally has one row per provider, but duplicates accumulate over
/// time and resolution must tolerate them. Token columns hold serialized
/// [`crate::secrets::EncryptedEnvelope`] JSON, never plaintext.
#[derive(Clone, Debug)]
pub struct ProviderAccount {
    pub id: i64,
    pub user_id: UserId,
    pub provider: String,
    pub access_token: Option<String>,
    pub app_access_token: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Denormalized GitHub profile cache, keyed by user.
///
/// Display data only; credentials live on [`ProviderAccount`] and
/// [`SourceControlToken`].
#[derive(Clone, Debug)]
pub struct GithubProfile {
    pub user_id: UserId,
    pub username: Option<String>,
    pub github_user_id: Option<i64>,
    pub public_repos: Option<i64>,
    pub followers: Option<i64>,
    pub updated_at: OffsetDateTime,
}

/// An org-scoped source control credential, keyed (user, org).
///
/// Used instead of the personal account token once a workspace links an
/// organization-level installation. `token` holds serialized envelope JSON.
#[derive(Clone, Debug)]
pub struct SourceControlToken {
    pub user_id: UserId,
    pub source_control_org_id: SourceControlOrgId,
    pub token: String,
    pub created_at: OffsetDateTime,
}

/// A provisioned swarm record, bound 1:1 to a workspace.
#[derive(Clone, Debug)]
pub struct Swarm {
    pub id: SwarmId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub address: String,
    #[debug(skip)]
    pub password: String,
    /// Serialized envelope JSON; the plaintext key is never stored.
    pub api_key: String,
    /// Indirection token substituted by downstream secret resolution; never
    /// the key itself.
    pub secret_alias: String,
    pub wizard_step: WizardStep,
    pub step_status: StepStatus,
    pub wizard_data: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields for inserting a freshly provisioned swarm in a single write.
#[derive(Clone, Debug)]
pub struct NewSwarm {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub address: String,
    #[debug(skip)]
    pub password: String,
    /// Serialized envelope JSON.
    pub api_key: String,
    pub secret_alias: String,
}

/// Mutable workspace settings, applied by admins.
#[derive(Clone, Debug, Default)]
pub struct WorkspaceSettings {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Workspace, membership, and user lookups used by access resolution and the
/// handlers gated on it.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn user_by_id(&self, user_id: UserId) -> Result<Option<User>>;

    /// Look up a workspace by slug or id. Soft-deleted workspaces are
    /// returned (with `deleted` set); visibility policy belongs to the
    /// caller, not the store.
    async fn workspace_by_ref(&self, workspace: &WorkspaceRef) -> Result<Option<Workspace>>;

    /// The caller's membership in the workspace, if it is still active
    /// (`left_at` is null).
    async fn active_membership(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<Option<WorkspaceMembership>>;

    async fn update_workspace_settings(
        &self,
        workspace_id: WorkspaceId,
        settings: &WorkspaceSettings,
    ) -> Result<()>;

    /// Soft-delete: mark deleted, move the current slug aside to
    /// `retired_slug`, and record it in `original_slug`, in one write.
    async fn soft_delete_workspace(
        &self,
        workspace_id: WorkspaceId,
        retired_slug: &str,
    ) -> Result<()>;
}

/// Credential record lookups. No business logic; precedence and exclusion
/// rules live in [`crate::credentials`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn accounts_by_user_and_provider(
        &self,
        user_id: UserId,
        provider: &str,
    ) -> Result<Vec<ProviderAccount>>;

    async fn github_profile_by_user(&self, user_id: UserId) -> Result<Option<GithubProfile>>;

    async fn source_control_token(
        &self,
        user_id: UserId,
        org_id: SourceControlOrgId,
    ) -> Result<Option<SourceControlToken>>;
}

/// Swarm record access for provisioning and ingest reconciliation.
#[async_trait]
pub trait SwarmStore: Send + Sync {
    async fn swarm_by_id(&self, swarm_id: SwarmId) -> Result<Option<Swarm>>;

    async fn swarm_by_workspace(&self, workspace_id: WorkspaceId) -> Result<Option<Swarm>>;

    async fn insert_swarm(&self, swarm: &NewSwarm) -> Result<SwarmId>;

    /// Replace the swarm's `wizard_data.stakgraph` sub-object wholesale and
    /// set the wizard step and step status, in a single write.
    async fn update_swarm_ingest(
        &self,
        swarm_id: SwarmId,
        step: WizardStep,
        status: StepStatus,
        snapshot: serde_json::Value,
    ) -> Result<()>;
}
