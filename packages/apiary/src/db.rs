//! Database interface.
//!
//! [`Postgres`] implements the store traits from [`crate::store`] with
//! runtime-bound queries. Queries deliberately avoid the compile-time
//! checked macros so the crate builds without a live database; the schema
//! itself lives in `schema/migrations` and is embedded via the migrator.

use async_trait::async_trait;
use color_eyre::{
    Result,
    eyre::{Context, bail, eyre},
};
use derive_more::Debug;
use sqlx::{PgPool, Row, migrate::Migrator, postgres::PgRow};

use crate::{
    auth::{
        AuthenticatedUser, RawToken, SourceControlOrgId, SwarmId, UserId, WorkspaceId,
        WorkspaceRef, WorkspaceRole,
    },
    crypto::TokenHash,
    provisioning::{StepStatus, WizardStep},
    store::{
        CredentialStore, GithubProfile, NewSwarm, ProviderAccount, SourceControlToken, Swarm,
        SwarmStore, User, Workspace, WorkspaceMembership, WorkspaceSettings, WorkspaceStore,
    },
};

/// A connected Postgres database instance.
#[derive(Clone, Debug)]
#[debug("Postgres(pool_size = {})", self.pool.size())]
pub struct Postgres {
    pub pool: PgPool,
}

impl Postgres {
    /// The migrator for the database.
    pub const MIGRATOR: Migrator = sqlx::migrate!("./schema/migrations");

    /// Connect to the Postgres database.
    #[tracing::instrument(name = "Postgres::connect")]
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self { pool })
    }

    /// Apply pending migrations.
    #[tracing::instrument(name = "Postgres::run_migrations", skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        Self::MIGRATOR
            .run(&self.pool)
            .await
            .context("apply migrations")
    }

    /// Ping the database to ensure the connection is alive.
    #[tracing::instrument(name = "Postgres::ping", skip(self))]
    pub async fn ping(&self) -> Result<()> {
        let pong: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("ping database")?;
        if pong != 1 {
            bail!("database ping failed; unexpected response: {pong}");
        }
        Ok(())
    }

    /// Validate a raw API token against the database.
    ///
    /// Returns `Some(AuthenticatedUser)` if the token is valid and not
    /// revoked, otherwise `None`. Errors are only returned for database
    /// failures.
    #[tracing::instrument(name = "Postgres::validate", skip(self, token))]
    pub async fn validate(&self, token: impl AsRef<RawToken>) -> Result<Option<AuthenticatedUser>> {
        let hash = TokenHash::new(token.as_ref().expose());
        let row = sqlx::query(
            r#"
            SELECT account_id
            FROM api_key
            WHERE hash = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(hash.as_bytes())
        .fetch_optional(&self.pool)
        .await
        .context("query for token")?;

        Ok(row.map(|r| AuthenticatedUser {
            user_id: UserId::from_i64(r.get::<i64, _>("account_id")),
        }))
    }

    /// Generate a new API token for the account.
    ///
    /// Returns the raw token; only the hash is stored.
    #[tracing::instrument(name = "Postgres::create_api_key", skip(self))]
    pub async fn create_api_key(&self, user_id: UserId, name: &str) -> Result<RawToken> {
        let token = crate::crypto::generate_api_key();
        let hash = TokenHash::new(token.expose());

        sqlx::query(
            r#"
            INSERT INTO api_key (account_id, name, hash)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id.as_i64())
        .bind(name)
        .bind(hash.as_bytes())
        .execute(&self.pool)
        .await
        .context("insert api key")?;

        Ok(token)
    }

    /// Revoke the given API token.
    #[tracing::instrument(name = "Postgres::revoke_api_key", skip(self, token))]
    pub async fn revoke_api_key(&self, token: impl AsRef<RawToken>) -> Result<bool> {
        let hash = TokenHash::new(token.as_ref().expose());
        let result = sqlx::query(
            r#"
            UPDATE api_key
            SET revoked_at = NOW()
            WHERE hash = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(hash.as_bytes())
        .execute(&self.pool)
        .await
        .context("revoke api key")?;

        Ok(result.rows_affected() > 0)
    }
}

impl AsRef<PgPool> for Postgres {
    fn as_ref(&self) -> &PgPool {
        &self.pool
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: UserId::from_i64(row.get("id")),
        email: row.get("email"),
        name: row.get("name"),
        deleted: row.get("deleted"),
        created_at: row.get("created_at"),
    }
}

fn workspace_from_row(row: &PgRow) -> Workspace {
    Workspace {
        id: WorkspaceId::from_i64(row.get("id")),
        slug: row.get("slug"),
        original_slug: row.get("original_slug"),
        name: row.get("name"),
        description: row.get("description"),
        owner_id: UserId::from_i64(row.get("owner_id")),
        source_control_org_id: row
            .get::<Option<i64>, _>("source_control_org_id")
            .map(SourceControlOrgId::from_i64),
        deleted: row.get("deleted"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
    }
}

fn swarm_from_row(row: &PgRow) -> Result<Swarm> {
    let step_name: String = row.get("wizard_step");
    let status_name: String = row.get("step_status");
    Ok(Swarm {
        id: SwarmId::from_i64(row.get("id")),
        workspace_id: WorkspaceId::from_i64(row.get("workspace_id")),
        name: row.get("name"),
        address: row.get("address"),
        password: row.get("password"),
        api_key: row.get("api_key"),
        secret_alias: row.get("secret_alias"),
        wizard_step: WizardStep::from_db_name(&step_name)
            .ok_or_else(|| eyre!("unknown wizard step: {step_name}"))?,
        step_status: StepStatus::from_db_name(&status_name)
            .ok_or_else(|| eyre!("unknown step status: {status_name}"))?,
        wizard_data: row.get("wizard_data"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const WORKSPACE_COLUMNS: &str = "id, slug, original_slug, name, description, owner_id, \
     source_control_org_id, deleted, deleted_at, created_at";

const SWARM_COLUMNS: &str = "id, workspace_id, name, address, password, api_key, secret_alias, \
     wizard_step, step_status, wizard_data, created_at, updated_at";

#[async_trait]
impl WorkspaceStore for Postgres {
    #[tracing::instrument(name = "Postgres::user_by_id", skip(self))]
    async fn user_by_id(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, name, deleted, created_at
            FROM account
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .context("fetch account")?;

        Ok(row.as_ref().map(user_from_row))
    }

    #[tracing::instrument(name = "Postgres::workspace_by_ref", skip(self))]
    async fn workspace_by_ref(&self, workspace: &WorkspaceRef) -> Result<Option<Workspace>> {
        let row = match workspace {
            WorkspaceRef::Slug(slug) => {
                let sql = format!("SELECT {WORKSPACE_COLUMNS} FROM workspace WHERE slug = $1");
                sqlx::query(&sql)
                    .bind(slug.clone())
                    .fetch_optional(&self.pool)
                    .await
            }
            WorkspaceRef::Id(id) => {
                let sql = format!("SELECT {WORKSPACE_COLUMNS} FROM workspace WHERE id = $1");
                sqlx::query(&sql)
                    .bind(id.as_i64())
                    .fetch_optional(&self.pool)
                    .await
            }
        }
        .context("fetch workspace")?;

        Ok(row.as_ref().map(workspace_from_row))
    }

    #[tracing::instrument(name = "Postgres::active_membership", skip(self))]
    async fn active_membership(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<Option<WorkspaceMembership>> {
        let row = sqlx::query(
            r#"
            SELECT workspace_id, account_id, role, left_at, created_at
            FROM workspace_member
            WHERE workspace_id = $1 AND account_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(workspace_id.as_i64())
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .context("fetch membership")?;

        match row {
            Some(row) => {
                let role_name: String = row.get("role");
                let role = WorkspaceRole::from_db_name(&role_name)
                    .ok_or_else(|| eyre!("unknown role: {role_name}"))?;
                Ok(Some(WorkspaceMembership {
                    workspace_id: WorkspaceId::from_i64(row.get("workspace_id")),
                    user_id: UserId::from_i64(row.get("account_id")),
                    role,
                    left_at: row.get("left_at"),
                    created_at: row.get("created_at"),
                }))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(name = "Postgres::update_workspace_settings", skip(self, settings))]
    async fn update_workspace_settings(
        &self,
        workspace_id: WorkspaceId,
        settings: &WorkspaceSettings,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workspace
            SET name = COALESCE($2, name),
                description = COALESCE($3, description)
            WHERE id = $1 AND deleted = FALSE
            "#,
        )
        .bind(workspace_id.as_i64())
        .bind(settings.name.as_deref())
        .bind(settings.description.as_deref())
        .execute(&self.pool)
        .await
        .context("update workspace settings")?;

        Ok(())
    }

    #[tracing::instrument(name = "Postgres::soft_delete_workspace", skip(self))]
    async fn soft_delete_workspace(
        &self,
        workspace_id: WorkspaceId,
        retired_slug: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workspace
            SET deleted = TRUE,
                deleted_at = NOW(),
                original_slug = slug,
                slug = $2
            WHERE id = $1 AND deleted = FALSE
            "#,
        )
        .bind(workspace_id.as_i64())
        .bind(retired_slug)
        .execute(&self.pool)
        .await
        .context("soft delete workspace")?;

        if result.rows_affected() == 0 {
            bail!("no such workspace to delete");
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for Postgres {
    #[tracing::instrument(name = "Postgres::accounts_by_user_and_provider", skip(self))]
    async fn accounts_by_user_and_provider(
        &self,
        user_id: UserId,
        provider: &str,
    ) -> Result<Vec<ProviderAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, provider, access_token, app_access_token,
                   expires_at, created_at
            FROM provider_account
            WHERE account_id = $1 AND provider = $2
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id.as_i64())
        .bind(provider)
        .fetch_all(&self.pool)
        .await
        .context("fetch provider accounts")?;

        Ok(rows
            .into_iter()
            .map(|row| ProviderAccount {
                id: row.get("id"),
                user_id: UserId::from_i64(row.get("account_id")),
                provider: row.get("provider"),
                access_token: row.get("access_token"),
                app_access_token: row.get("app_access_token"),
                expires_at: row.get("expires_at"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    #[tracing::instrument(name = "Postgres::github_profile_by_user", skip(self))]
    async fn github_profile_by_user(&self, user_id: UserId) -> Result<Option<GithubProfile>> {
        let row = sqlx::query(
            r#"
            SELECT account_id, username, github_user_id, public_repos, followers, updated_at
            FROM github_profile
            WHERE account_id = $1
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .context("fetch github profile")?;

        Ok(row.map(|row| GithubProfile {
            user_id: UserId::from_i64(row.get("account_id")),
            username: row.get("username"),
            github_user_id: row.get("github_user_id"),
            public_repos: row.get("public_repos"),
            followers: row.get("followers"),
            updated_at: row.get("updated_at"),
        }))
    }

    #[tracing::instrument(name = "Postgres::source_control_token", skip(self))]
    async fn source_control_token(
        &self,
        user_id: UserId,
        org_id: SourceControlOrgId,
    ) -> Result<Option<SourceControlToken>> {
        let row = sqlx::query(
            r#"
            SELECT account_id, source_control_org_id, token, created_at
            FROM source_control_token
            WHERE account_id = $1 AND source_control_org_id = $2
            "#,
        )
        .bind(user_id.as_i64())
        .bind(org_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .context("fetch source control token")?;

        Ok(row.map(|row| SourceControlToken {
            user_id: UserId::from_i64(row.get("account_id")),
            source_control_org_id: SourceControlOrgId::from_i64(
                row.get("source_control_org_id"),
            ),
            token: row.get("token"),
            created_at: row.get("created_at"),
        }))
    }
}

#[async_trait]
impl SwarmStore for Postgres {
    #[tracing::instrument(name = "Postgres::swarm_by_id", skip(self))]
    async fn swarm_by_id(&self, swarm_id: SwarmId) -> Result<Option<Swarm>> {
        let row = sqlx::query(&format!("SELECT {SWARM_COLUMNS} FROM swarm WHERE id = $1"))
            .bind(swarm_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .context("fetch swarm")?;

        row.as_ref().map(swarm_from_row).transpose()
    }

    #[tracing::instrument(name = "Postgres::swarm_by_workspace", skip(self))]
    async fn swarm_by_workspace(&self, workspace_id: WorkspaceId) -> Result<Option<Swarm>> {
        let row = sqlx::query(&format!(
            "SELECT {SWARM_COLUMNS} FROM swarm WHERE workspace_id = $1"
        ))
        .bind(workspace_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .context("fetch swarm by workspace")?;

        row.as_ref().map(swarm_from_row).transpose()
    }

    #[tracing::instrument(name = "Postgres::insert_swarm", skip(self, swarm))]
    async fn insert_swarm(&self, swarm: &NewSwarm) -> Result<SwarmId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO swarm
                (workspace_id, name, address, password, api_key, secret_alias)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(swarm.workspace_id.as_i64())
        .bind(&swarm.name)
        .bind(&swarm.address)
        .bind(&swarm.password)
        .bind(&swarm.api_key)
        .bind(&swarm.secret_alias)
        .fetch_one(&self.pool)
        .await
        .context("insert swarm")?;

        Ok(SwarmId::from_i64(id))
    }

    #[tracing::instrument(name = "Postgres::update_swarm_ingest", skip(self, snapshot))]
    async fn update_swarm_ingest(
        &self,
        swarm_id: SwarmId,
        step: WizardStep,
        status: StepStatus,
        snapshot: serde_json::Value,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE swarm
            SET wizard_step = $2,
                step_status = $3,
                wizard_data = jsonb_set(
                    COALESCE(wizard_data, '{}'::jsonb), '{stakgraph}', $4::jsonb, TRUE
                ),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(swarm_id.as_i64())
        .bind(step.as_db_name())
        .bind(status.as_db_name())
        .bind(snapshot)
        .execute(&self.pool)
        .await
        .context("update swarm ingest snapshot")?;

        if result.rows_affected() == 0 {
            bail!("no such swarm to update");
        }
        Ok(())
    }
}
