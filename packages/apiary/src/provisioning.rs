//! Reconciliation of external code-graph ingestion callbacks.
//!
//! The ingestion service reports progress through webhook deliveries that
//! arrive independently of the request that started the job, possibly
//! duplicated, retried, or out of order. Each delivery is folded into the
//! swarm's wizard record as a wholesale snapshot replacement, so repeated
//! deliveries are harmless: the write is keyed by swarm, not accumulated.
//! Ordering is last-write-wins by arrival; the payload's own timestamps are
//! provenance, not freshness, and take no part in conflict resolution.
//!
//! Persistence failures propagate to the caller. The delivery fails, the
//! external service retries, and that retry is the recovery path; swallowing
//! the error here would silently desynchronize externally-visible status
//! from local state.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::{
    auth::SwarmId,
    store::SwarmStore,
};

/// Internal status of a wizard step.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn from_db_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_db_name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Setup wizard steps for a provisioned swarm.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WizardStep {
    GraphInfrastructure,
    IngestCode,
    AddServices,
    Completion,
}

impl WizardStep {
    pub fn from_db_name(name: &str) -> Option<Self> {
        match name {
            "graph_infrastructure" => Some(Self::GraphInfrastructure),
            "ingest_code" => Some(Self::IngestCode),
            "add_services" => Some(Self::AddServices),
            "completion" => Some(Self::Completion),
            _ => None,
        }
    }

    pub fn as_db_name(&self) -> &'static str {
        match self {
            Self::GraphInfrastructure => "graph_infrastructure",
            Self::IngestCode => "ingest_code",
            Self::AddServices => "add_services",
            Self::Completion => "completion",
        }
    }
}

/// Map an external ingestion status onto the internal step status.
///
/// This is the single point of truth for the translation, and it is total:
/// a status string this build has never seen maps to `Pending` (and is
/// logged) instead of failing the delivery.
pub fn map_status(external: &str) -> StepStatus {
    match external.to_ascii_lowercase().as_str() {
        "pending" | "queued" => StepStatus::Pending,
        "in_progress" | "inprogress" | "processing" | "running" | "started" => {
            StepStatus::Processing
        }
        "complete" | "completed" | "success" | "synced" => StepStatus::Completed,
        "failed" | "error" | "cancelled" => StepStatus::Failed,
        other => {
            warn!(status = other, "ingest.status.unrecognized");
            StepStatus::Pending
        }
    }
}

/// An inbound webhook delivery from the ingestion service.
#[derive(Clone, Debug, Deserialize)]
pub struct IngestEvent {
    pub request_id: String,
    pub status: String,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub result: Option<IngestResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Node/edge counts reported by a finished ingestion run.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct IngestResult {
    #[serde(default)]
    pub nodes: Option<u64>,
    #[serde(default)]
    pub edges: Option<u64>,
}

/// The snapshot persisted as the swarm's `wizard_data.stakgraph` sub-object.
///
/// The three payload timestamps are carried through unchanged;
/// `last_update_at` is always freshly generated at processing time.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSnapshot {
    pub status: StepStatus,
    pub progress: u32,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update_at: OffsetDateTime,
}

/// Result of applying a delivery.
#[derive(Clone, Debug)]
pub enum ApplyOutcome {
    Applied(IngestSnapshot),
    SwarmNotFound,
}

/// Fold one webhook delivery into the swarm's wizard record.
///
/// Builds the snapshot, then performs a single store write that replaces
/// `wizard_data.stakgraph` wholesale and pins the wizard step to
/// [`WizardStep::IngestCode`] with the mapped status. Store errors
/// propagate; the external retry mechanism is the recovery path.
#[tracing::instrument(
    skip(store, event, request_id_header),
    fields(request_id = %event.request_id, status = %event.status)
)]
pub async fn apply_ingest_event<S: SwarmStore>(
    store: &S,
    swarm_id: SwarmId,
    event: IngestEvent,
    request_id_header: Option<String>,
) -> color_eyre::Result<ApplyOutcome> {
    let Some(swarm) = store.swarm_by_id(swarm_id).await? else {
        warn!("ingest.apply.swarm_not_found");
        return Ok(ApplyOutcome::SwarmNotFound);
    };

    let status = map_status(&event.status);
    let snapshot = IngestSnapshot {
        status,
        progress: event.progress,
        request_id: event.request_id,
        request_id_header,
        nodes: event.result.and_then(|r| r.nodes),
        edges: event.result.and_then(|r| r.edges),
        error: event.error,
        started_at: event.started_at,
        completed_at: event.completed_at,
        duration_ms: event.duration_ms,
        last_update_at: OffsetDateTime::now_utc(),
    };

    let value = serde_json::to_value(&snapshot)?;
    store
        .update_swarm_ingest(swarm.id, WizardStep::IngestCode, status, value)
        .await?;

    info!(
        swarm_id = %swarm.id,
        status = %status,
        progress = snapshot.progress,
        "ingest.apply.persisted"
    );
    Ok(ApplyOutcome::Applied(snapshot))
}
