//! Tests for the two-phase swarm create flow.

use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use apiary::{
    auth::{UserId, WorkspaceRole},
    swarm::{
        CreateSwarmOutcome, FIELD_SWARM_API_KEY, ProvisioningApi, RemoteError,
        RemoteSwarmRequest, RemoteSwarmResponse, SwarmProvisioner, secret_alias,
    },
};
use async_trait::async_trait;
use pretty_assertions::assert_eq as pretty_assert_eq;

use crate::support::{self, InMemory};

/// A programmable stand-in for the remote provisioning service.
#[derive(Default)]
struct FakeApi {
    calls: AtomicUsize,
    fail_with: Mutex<Option<RemoteError>>,
    last_request: Mutex<Option<RemoteSwarmRequest>>,
}

impl FakeApi {
    fn failing(status: Option<u16>, message: &str) -> Self {
        Self {
            fail_with: Mutex::new(Some(RemoteError {
                status,
                message: message.to_string(),
            })),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisioningApi for &FakeApi {
    async fn create_swarm(
        &self,
        request: &RemoteSwarmRequest,
    ) -> Result<RemoteSwarmResponse, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(RemoteSwarmResponse {
            swarm_id: String::from("sw-abc123"),
            address: String::from("https://sw-abc123.swarms.example.com"),
            x_api_key: String::from("sk_live_remote_key"),
        })
    }
}

fn store_with_owner() -> InMemory {
    let store = InMemory::new();
    {
        let mut state = store.state.lock().unwrap();
        state.users.push(support::user(1, "owner@example.com"));
        state.users.push(support::user(2, "viewer@example.com"));
        state.workspaces.push(support::workspace(10, "acme", 1));
        state
            .memberships
            .push(support::membership(10, 2, WorkspaceRole::Viewer));
    }
    store
}

fn provisioner(api: &FakeApi) -> SwarmProvisioner<&FakeApi> {
    SwarmProvisioner::new(api, support::cipher(), "m6i.xlarge")
}

#[test_log::test(tokio::test)]
async fn successful_create_persists_an_encrypted_key() {
    let store = store_with_owner();
    let api = FakeApi::default();

    let outcome = provisioner(&api)
        .create(&store, UserId::from_u64(1), &"acme".into())
        .await
        .unwrap();

    let CreateSwarmOutcome::Created { swarm_id } = outcome else {
        panic!("expected creation, got {outcome:?}");
    };

    let swarm = store.swarm(swarm_id).unwrap();
    pretty_assert_eq!(swarm.name, "acme-swarm");
    pretty_assert_eq!(swarm.address, "https://sw-abc123.swarms.example.com");
    pretty_assert_eq!(swarm.secret_alias, "{{SWARM_sw-abc123_API_KEY}}");

    // The stored column holds an envelope, never the key.
    assert!(!swarm.api_key.contains("sk_live_remote_key"));
    let opened = support::cipher()
        .decrypt_field_from_json(FIELD_SWARM_API_KEY, &swarm.api_key)
        .unwrap();
    pretty_assert_eq!(opened, "sk_live_remote_key");

    // The generated password went to the remote call verbatim.
    let sent = api.last_request.lock().unwrap().clone().unwrap();
    pretty_assert_eq!(sent.password, swarm.password);
    pretty_assert_eq!(sent.password.len(), 20);
}

#[test_log::test(tokio::test)]
async fn viewer_is_denied_before_any_side_effect() {
    let store = store_with_owner();
    let api = FakeApi::default();

    let outcome = provisioner(&api)
        .create(&store, UserId::from_u64(2), &"acme".into())
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CreateSwarmOutcome::Forbidden {
            role: WorkspaceRole::Viewer
        }
    ));
    pretty_assert_eq!(api.calls(), 0);
    pretty_assert_eq!(store.swarm_count(), 0);
}

#[test_log::test(tokio::test)]
async fn stranger_sees_not_found() {
    let store = store_with_owner();
    let api = FakeApi::default();

    let outcome = provisioner(&api)
        .create(&store, UserId::from_u64(99), &"acme".into())
        .await
        .unwrap();

    assert!(matches!(outcome, CreateSwarmOutcome::NotFound));
    pretty_assert_eq!(api.calls(), 0);
}

#[test_log::test(tokio::test)]
async fn remote_failure_leaves_no_half_row() {
    let store = store_with_owner();
    let api = FakeApi::failing(Some(402), "instance quota exceeded");

    let outcome = provisioner(&api)
        .create(&store, UserId::from_u64(1), &"acme".into())
        .await
        .unwrap();

    let CreateSwarmOutcome::RemoteFailed { status, message } = outcome else {
        panic!("expected a remote failure, got {outcome:?}");
    };
    pretty_assert_eq!(status, Some(402));
    pretty_assert_eq!(message, "instance quota exceeded");
    pretty_assert_eq!(store.swarm_count(), 0);
}

#[test_log::test(tokio::test)]
async fn persistence_failure_is_opaque_and_leaks_nothing() {
    let store = store_with_owner();
    store.fail_swarm_insert.store(true, Ordering::SeqCst);
    let api = FakeApi::default();

    let outcome = provisioner(&api)
        .create(&store, UserId::from_u64(1), &"acme".into())
        .await
        .unwrap();

    // The caller learns nothing beyond "it failed"; in particular the
    // outcome carries no key, password, or alias.
    assert!(matches!(outcome, CreateSwarmOutcome::PersistenceFailed));
    assert!(!format!("{outcome:?}").contains("sk_live_remote_key"));
    pretty_assert_eq!(store.swarm_count(), 0);
}

#[test_log::test(tokio::test)]
async fn second_swarm_for_a_workspace_is_rejected() {
    let store = store_with_owner();
    store
        .state
        .lock()
        .unwrap()
        .swarms
        .push(support::swarm(5, 10));
    let api = FakeApi::default();

    let outcome = provisioner(&api)
        .create(&store, UserId::from_u64(1), &"acme".into())
        .await
        .unwrap();

    assert!(matches!(outcome, CreateSwarmOutcome::AlreadyExists));
    pretty_assert_eq!(api.calls(), 0);
}

#[test]
fn alias_references_the_key_without_containing_it() {
    let alias = secret_alias("sw-abc123");
    pretty_assert_eq!(alias, "{{SWARM_sw-abc123_API_KEY}}");
    assert!(!alias.contains("sk_"));
}
