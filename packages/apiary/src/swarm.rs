//! Two-phase swarm provisioning: create the remote resource, then persist
//! its credentials.
//!
//! The ordering invariants here are the whole point:
//!
//! - authorization is checked before any side effect;
//! - a failed remote call leaves no local row;
//! - the remote API key is encrypted before it ever touches persistence;
//! - neither the key, the generated password, nor the alias is echoed back
//!   to the caller; a successful create returns only the local record id.
//!
//! There is no compensating transaction: a crash between remote creation
//! and the local insert orphans the remote resource. That window is
//! accepted; reconciliation is an operational concern, not this component's.

use std::time::Duration;

use async_trait::async_trait;
use derive_more::Debug;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use url::Url;

use crate::{
    access::{self, ActionAuthorization},
    auth::{SwarmId, UserId, WorkspaceRef, WorkspaceRole},
    crypto,
    secrets::SecretCipher,
    store::{NewSwarm, SwarmStore, WorkspaceStore},
};

/// Envelope field name for the stored swarm API key.
pub const FIELD_SWARM_API_KEY: &str = "swarm_api_key";

/// Configuration for the remote provisioning service.
#[derive(Clone, Debug)]
#[debug("SwarmConfig(base_url = {})", self.base_url)]
pub struct SwarmConfig {
    pub base_url: Url,
    /// Service-level key authenticating us to the provisioning API.
    pub service_key: String,
    /// Bound on every outbound provisioning call; a timeout is an ordinary
    /// remote failure.
    pub timeout: Duration,
    /// Instance class requested for new swarms.
    pub instance_type: String,
}

/// A sanitized remote failure: status and message only, never a request or
/// response body.
#[derive(Clone, Debug)]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
}

/// Parameters sent to the remote provisioning API.
#[derive(Clone, Debug, Serialize)]
pub struct RemoteSwarmRequest {
    pub name: String,
    pub instance_type: String,
    #[debug(skip)]
    pub password: String,
}

/// The remote provisioning API's create response.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteSwarmResponse {
    pub swarm_id: String,
    pub address: String,
    #[debug(skip)]
    pub x_api_key: String,
}

/// The remote provisioning API surface, kept narrow so the provisioner can
/// be exercised without the network.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    async fn create_swarm(
        &self,
        request: &RemoteSwarmRequest,
    ) -> Result<RemoteSwarmResponse, RemoteError>;
}

/// HTTP client for the remote provisioning service.
#[derive(Clone, Debug)]
#[debug("SwarmGateway(base_url = {})", self.base_url)]
pub struct SwarmGateway {
    client: reqwest::Client,
    base_url: Url,
    service_key: String,
}

impl SwarmGateway {
    pub fn new(config: &SwarmConfig) -> color_eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            service_key: config.service_key.clone(),
        })
    }

    fn endpoint(&self) -> color_eyre::Result<Url> {
        Ok(self.base_url.join("api/v1/swarms")?)
    }
}

/// Error body shape the provisioning service uses for non-success statuses.
#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    message: Option<String>,
}

const REMOTE_MESSAGE_LIMIT: usize = 200;

#[async_trait]
impl ProvisioningApi for SwarmGateway {
    #[tracing::instrument(skip(self, request), fields(name = %request.name))]
    async fn create_swarm(
        &self,
        request: &RemoteSwarmRequest,
    ) -> Result<RemoteSwarmResponse, RemoteError> {
        let endpoint = self.endpoint().map_err(|_| RemoteError {
            status: None,
            message: String::from("invalid provisioning service URL"),
        })?;

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.service_key)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                warn!(timeout = err.is_timeout(), "swarm.remote.unreachable");
                RemoteError {
                    status: None,
                    message: String::from("provisioning service unreachable"),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            // Only the service's `message` field is surfaced, truncated;
            // arbitrary response bodies stay out of error paths.
            let message = response
                .json::<RemoteErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message)
                .map(|m| m.chars().take(REMOTE_MESSAGE_LIMIT).collect())
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("provisioning request failed")
                        .to_string()
                });
            warn!(status = status.as_u16(), "swarm.remote.rejected");
            return Err(RemoteError {
                status: Some(status.as_u16()),
                message,
            });
        }

        response.json::<RemoteSwarmResponse>().await.map_err(|_| {
            warn!("swarm.remote.malformed_response");
            RemoteError {
                status: Some(status.as_u16()),
                message: String::from("provisioning service returned a malformed response"),
            }
        })
    }
}

/// The alias stored (and later substituted by downstream secret resolution)
/// in place of the key itself.
pub fn secret_alias(remote_id: &str) -> String {
    format!("{{{{SWARM_{remote_id}_API_KEY}}}}")
}

/// Outcome of a create request, mapped by handlers onto HTTP statuses.
#[derive(Clone, Debug)]
pub enum CreateSwarmOutcome {
    /// Only the local record id is returned; key, password, and alias are
    /// never echoed.
    Created { swarm_id: SwarmId },
    /// The workspace already has its swarm (1:1 binding).
    AlreadyExists,
    Forbidden { role: WorkspaceRole },
    NotFound,
    RemoteFailed { status: Option<u16>, message: String },
    /// The remote resource exists but the local write failed. Reported
    /// opaquely; the inconsistency window is reconciled out of band.
    PersistenceFailed,
}

/// Orchestrates the two-phase create flow.
#[derive(Clone, Debug)]
#[debug("SwarmProvisioner")]
pub struct SwarmProvisioner<A = SwarmGateway> {
    api: A,
    cipher: SecretCipher,
    instance_type: String,
}

impl<A: ProvisioningApi> SwarmProvisioner<A> {
    pub fn new(api: A, cipher: SecretCipher, instance_type: impl Into<String>) -> Self {
        Self {
            api,
            cipher,
            instance_type: instance_type.into(),
        }
    }

    /// Create a swarm for the workspace.
    ///
    /// Capability is validated first (`can_admin`); absence of access
    /// short-circuits with no side effects, and a failed remote call
    /// performs no persistence write.
    #[tracing::instrument(skip(self, store))]
    pub async fn create<S>(
        &self,
        store: &S,
        user_id: UserId,
        workspace: &WorkspaceRef,
    ) -> color_eyre::Result<CreateSwarmOutcome>
    where
        S: WorkspaceStore + SwarmStore,
    {
        let workspace = match access::authorize_settings_update(store, user_id, workspace).await? {
            ActionAuthorization::Granted { workspace, .. } => workspace,
            ActionAuthorization::Forbidden { role } => {
                return Ok(CreateSwarmOutcome::Forbidden { role });
            }
            ActionAuthorization::NotFound => return Ok(CreateSwarmOutcome::NotFound),
        };

        if store.swarm_by_workspace(workspace.id).await?.is_some() {
            return Ok(CreateSwarmOutcome::AlreadyExists);
        }

        let password = crypto::generate_swarm_password();
        let request = RemoteSwarmRequest {
            name: format!("{}-swarm", workspace.slug),
            instance_type: self.instance_type.clone(),
            password: password.clone(),
        };

        let remote = match self.api.create_swarm(&request).await {
            Ok(remote) => remote,
            Err(RemoteError { status, message }) => {
                warn!(?status, "swarm.create.remote_failed");
                return Ok(CreateSwarmOutcome::RemoteFailed { status, message });
            }
        };

        // Encrypt before the key can touch persistence; the stored column
        // only ever sees the envelope.
        let api_key = self
            .cipher
            .encrypt_field_to_json(FIELD_SWARM_API_KEY, &remote.x_api_key);
        let secret_alias = secret_alias(&remote.swarm_id);

        let new_swarm = NewSwarm {
            workspace_id: workspace.id,
            name: request.name,
            address: remote.address,
            password,
            api_key,
            secret_alias,
        };

        match store.insert_swarm(&new_swarm).await {
            Ok(swarm_id) => {
                info!(%swarm_id, workspace_id = %workspace.id, "swarm.create.success");
                Ok(CreateSwarmOutcome::Created { swarm_id })
            }
            Err(err) => {
                // The remote resource now exists without a local record.
                // Callers get an opaque failure; the detail stays in logs.
                error!(?err, remote_id = %remote.swarm_id, "swarm.create.persist_failed");
                Ok(CreateSwarmOutcome::PersistenceFailed)
            }
        }
    }
}
