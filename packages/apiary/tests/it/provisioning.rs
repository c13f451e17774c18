//! Tests for ingest webhook reconciliation.

use std::sync::atomic::Ordering;

use apiary::{
    auth::SwarmId,
    provisioning::{
        self, ApplyOutcome, IngestEvent, IngestResult, StepStatus, WizardStep, map_status,
    },
};
use pretty_assertions::assert_eq as pretty_assert_eq;
use simple_test_case::test_case;

use crate::support::{self, InMemory};

fn event(status: &str, progress: u32) -> IngestEvent {
    IngestEvent {
        request_id: String::from("r1"),
        status: status.to_string(),
        progress,
        result: None,
        error: None,
        started_at: None,
        completed_at: None,
        duration_ms: None,
    }
}

fn store_with_swarm() -> InMemory {
    let store = InMemory::new();
    store
        .state
        .lock()
        .unwrap()
        .swarms
        .push(support::swarm(5, 10));
    store
}

#[test_case("pending", StepStatus::Pending; "pending")]
#[test_case("queued", StepStatus::Pending; "queued")]
#[test_case("InProgress", StepStatus::Processing; "in progress mixed case")]
#[test_case("running", StepStatus::Processing; "running")]
#[test_case("Complete", StepStatus::Completed; "complete")]
#[test_case("completed", StepStatus::Completed; "completed")]
#[test_case("synced", StepStatus::Completed; "synced")]
#[test_case("FAILED", StepStatus::Failed; "failed upper case")]
#[test_case("error", StepStatus::Failed; "error")]
#[test_case("something-new", StepStatus::Pending; "unrecognized maps to pending")]
#[test]
fn status_mapping_is_total(external: &str, expected: StepStatus) {
    pretty_assert_eq!(map_status(external), expected);
}

#[test_log::test(tokio::test)]
async fn completed_delivery_writes_the_full_snapshot() {
    let store = store_with_swarm();
    let mut event = event("completed", 100);
    event.result = Some(IngestResult {
        nodes: Some(500),
        edges: Some(1200),
    });
    event.started_at = Some(String::from("2026-08-01T10:00:00Z"));
    event.completed_at = Some(String::from("2026-08-01T10:05:00Z"));
    event.duration_ms = Some(300_000);

    let outcome = provisioning::apply_ingest_event(
        &store,
        SwarmId::from_u64(5),
        event,
        Some(String::from("delivery-42")),
    )
    .await
    .unwrap();

    let ApplyOutcome::Applied(snapshot) = outcome else {
        panic!("expected the delivery to apply");
    };
    pretty_assert_eq!(snapshot.status, StepStatus::Completed);
    pretty_assert_eq!(snapshot.nodes, Some(500));
    pretty_assert_eq!(snapshot.edges, Some(1200));
    // Payload timestamps pass through unchanged.
    pretty_assert_eq!(snapshot.started_at.as_deref(), Some("2026-08-01T10:00:00Z"));

    let swarm = store.swarm(SwarmId::from_u64(5)).unwrap();
    pretty_assert_eq!(swarm.wizard_step, WizardStep::IngestCode);
    pretty_assert_eq!(swarm.step_status, StepStatus::Completed);

    let stakgraph = &swarm.wizard_data["stakgraph"];
    pretty_assert_eq!(stakgraph["status"], "COMPLETED");
    pretty_assert_eq!(stakgraph["progress"], 100);
    pretty_assert_eq!(stakgraph["nodes"], 500);
    pretty_assert_eq!(stakgraph["edges"], 1200);
    pretty_assert_eq!(stakgraph["requestId"], "r1");
    pretty_assert_eq!(stakgraph["requestIdHeader"], "delivery-42");
}

#[test_log::test(tokio::test)]
async fn duplicate_delivery_is_idempotent() {
    let store = store_with_swarm();

    let first = provisioning::apply_ingest_event(&store, SwarmId::from_u64(5), event("completed", 100), None)
        .await
        .unwrap();
    let ApplyOutcome::Applied(first) = first else {
        panic!("expected the delivery to apply");
    };

    let second = provisioning::apply_ingest_event(&store, SwarmId::from_u64(5), event("completed", 100), None)
        .await
        .unwrap();
    let ApplyOutcome::Applied(second) = second else {
        panic!("expected the delivery to apply");
    };

    // Identical except for freshness, which only moves forward.
    assert!(second.last_update_at >= first.last_update_at);
    let strip = |mut s: provisioning::IngestSnapshot| {
        s.last_update_at = first.last_update_at;
        s
    };
    pretty_assert_eq!(strip(second), strip(first.clone()));

    // The stored snapshot is the whole object, replaced, not accumulated.
    let swarm = store.swarm(SwarmId::from_u64(5)).unwrap();
    assert!(swarm.wizard_data["stakgraph"].is_object());
}

#[test_log::test(tokio::test)]
async fn later_delivery_replaces_the_snapshot_wholesale() {
    let store = store_with_swarm();

    let mut with_counts = event("completed", 100);
    with_counts.result = Some(IngestResult {
        nodes: Some(500),
        edges: Some(1200),
    });
    provisioning::apply_ingest_event(&store, SwarmId::from_u64(5), with_counts, None)
        .await
        .unwrap();

    // An (older) in-progress delivery arriving late still wins: ordering is
    // by arrival, not by payload timestamps.
    provisioning::apply_ingest_event(&store, SwarmId::from_u64(5), event("in_progress", 40), None)
        .await
        .unwrap();

    let swarm = store.swarm(SwarmId::from_u64(5)).unwrap();
    pretty_assert_eq!(swarm.step_status, StepStatus::Processing);
    let stakgraph = &swarm.wizard_data["stakgraph"];
    pretty_assert_eq!(stakgraph["progress"], 40);
    // No leftovers from the replaced snapshot.
    assert!(stakgraph.get("nodes").is_none());
}

#[test_log::test(tokio::test)]
async fn failed_delivery_records_the_error() {
    let store = store_with_swarm();
    let mut failed = event("failed", 80);
    failed.error = Some(String::from("clone failed: repository not found"));

    provisioning::apply_ingest_event(&store, SwarmId::from_u64(5), failed, None)
        .await
        .unwrap();

    let swarm = store.swarm(SwarmId::from_u64(5)).unwrap();
    pretty_assert_eq!(swarm.step_status, StepStatus::Failed);
    pretty_assert_eq!(
        swarm.wizard_data["stakgraph"]["error"],
        "clone failed: repository not found"
    );
}

#[test_log::test(tokio::test)]
async fn unknown_swarm_is_reported_without_writing() {
    let store = InMemory::new();
    let outcome =
        provisioning::apply_ingest_event(&store, SwarmId::from_u64(99), event("completed", 100), None)
            .await
            .unwrap();
    assert!(matches!(outcome, ApplyOutcome::SwarmNotFound));
    pretty_assert_eq!(store.calls(), vec!["swarm_by_id"]);
}

#[test_log::test(tokio::test)]
async fn persistence_failure_propagates() {
    let store = store_with_swarm();
    store.fail_swarm_update.store(true, Ordering::SeqCst);

    let result =
        provisioning::apply_ingest_event(&store, SwarmId::from_u64(5), event("completed", 100), None)
            .await;
    assert!(result.is_err());
}

#[test]
fn webhook_payload_wire_format() {
    let event: IngestEvent = serde_json::from_str(
        r#"{
            "request_id": "r1",
            "status": "completed",
            "progress": 100,
            "result": { "nodes": 500, "edges": 1200 },
            "error": null,
            "started_at": "2026-08-01T10:00:00Z",
            "duration_ms": 300000
        }"#,
    )
    .unwrap();
    pretty_assert_eq!(event.request_id, "r1");
    pretty_assert_eq!(event.progress, 100);
    pretty_assert_eq!(event.result.unwrap().nodes, Some(500));
    assert!(event.completed_at.is_none());
}
