//! Tests for workspace access resolution.

use apiary::{
    access::{self, AccessDecision, ActionAuthorization},
    auth::{UserId, WorkspaceRole},
};
use pretty_assertions::assert_eq as pretty_assert_eq;
use simple_test_case::test_case;
use time::OffsetDateTime;

use crate::support::{self, InMemory};

fn store_with_owner() -> InMemory {
    let store = InMemory::new();
    {
        let mut state = store.state.lock().unwrap();
        state.users.push(support::user(1, "owner@example.com"));
        state.users.push(support::user(2, "member@example.com"));
        state.workspaces.push(support::workspace(10, "acme", 1));
    }
    store
}

#[test_log::test(tokio::test)]
async fn owner_gets_all_capabilities() {
    let store = store_with_owner();

    let decision = access::resolve_access(&store, UserId::from_u64(1), &"acme".into())
        .await
        .unwrap();

    let AccessDecision::Granted(grant) = decision else {
        panic!("expected a grant, got {decision:?}");
    };
    pretty_assert_eq!(grant.role, WorkspaceRole::Owner);
    assert!(grant.can_read && grant.can_write && grant.can_admin);
}

#[test_log::test(tokio::test)]
async fn ownership_wins_over_membership_rows() {
    let store = store_with_owner();
    // A stray membership row for the owner must not demote them.
    store
        .state
        .lock()
        .unwrap()
        .memberships
        .push(support::membership(10, 1, WorkspaceRole::Viewer));

    let decision = access::resolve_access(&store, UserId::from_u64(1), &"acme".into())
        .await
        .unwrap();

    let AccessDecision::Granted(grant) = decision else {
        panic!("expected a grant, got {decision:?}");
    };
    pretty_assert_eq!(grant.role, WorkspaceRole::Owner);
}

#[test_case(WorkspaceRole::Admin, true, true, true; "admin")]
#[test_case(WorkspaceRole::Pm, true, true, true; "pm")]
#[test_case(WorkspaceRole::Developer, true, true, false; "developer")]
#[test_case(WorkspaceRole::Stakeholder, true, false, false; "stakeholder")]
#[test_case(WorkspaceRole::Viewer, true, false, false; "viewer")]
#[test_log::test(tokio::test)]
async fn member_capabilities_follow_the_role_table(
    role: WorkspaceRole,
    can_read: bool,
    can_write: bool,
    can_admin: bool,
) {
    let store = store_with_owner();
    store
        .state
        .lock()
        .unwrap()
        .memberships
        .push(support::membership(10, 2, role));

    let decision = access::resolve_access(&store, UserId::from_u64(2), &"acme".into())
        .await
        .unwrap();

    let AccessDecision::Granted(grant) = decision else {
        panic!("expected a grant, got {decision:?}");
    };
    pretty_assert_eq!(grant.role, role);
    pretty_assert_eq!(
        (grant.can_read, grant.can_write, grant.can_admin),
        (can_read, can_write, can_admin)
    );
}

#[test_log::test(tokio::test)]
async fn departed_member_gets_not_found() {
    let store = store_with_owner();
    {
        let mut state = store.state.lock().unwrap();
        let mut membership = support::membership(10, 2, WorkspaceRole::Admin);
        membership.left_at = Some(OffsetDateTime::now_utc());
        state.memberships.push(membership);
    }

    let decision = access::resolve_access(&store, UserId::from_u64(2), &"acme".into())
        .await
        .unwrap();
    pretty_assert_eq!(decision, AccessDecision::NotFound);
}

#[test_log::test(tokio::test)]
async fn missing_workspace_gets_not_found() {
    let store = store_with_owner();
    let decision = access::resolve_access(&store, UserId::from_u64(1), &"nope".into())
        .await
        .unwrap();
    pretty_assert_eq!(decision, AccessDecision::NotFound);
}

#[test_log::test(tokio::test)]
async fn soft_deleted_workspace_is_invisible_even_to_its_owner() {
    let store = store_with_owner();
    {
        let mut state = store.state.lock().unwrap();
        let workspace = &mut state.workspaces[0];
        workspace.deleted = true;
        workspace.deleted_at = Some(OffsetDateTime::now_utc());
    }

    let decision = access::resolve_access(&store, UserId::from_u64(1), &"acme".into())
        .await
        .unwrap();
    pretty_assert_eq!(decision, AccessDecision::NotFound);
}

#[test_case(WorkspaceRole::Admin; "admin")]
#[test_case(WorkspaceRole::Pm; "pm")]
#[test_log::test(tokio::test)]
async fn admin_capable_roles_may_update_settings(role: WorkspaceRole) {
    let store = store_with_owner();
    store
        .state
        .lock()
        .unwrap()
        .memberships
        .push(support::membership(10, 2, role));

    let auth = access::authorize_settings_update(&store, UserId::from_u64(2), &"acme".into())
        .await
        .unwrap();
    assert!(matches!(auth, ActionAuthorization::Granted { .. }));
}

#[test_case(WorkspaceRole::Developer; "developer")]
#[test_case(WorkspaceRole::Stakeholder; "stakeholder")]
#[test_case(WorkspaceRole::Viewer; "viewer")]
#[test_log::test(tokio::test)]
async fn weaker_roles_cannot_update_settings(role: WorkspaceRole) {
    let store = store_with_owner();
    store
        .state
        .lock()
        .unwrap()
        .memberships
        .push(support::membership(10, 2, role));

    let auth = access::authorize_settings_update(&store, UserId::from_u64(2), &"acme".into())
        .await
        .unwrap();
    assert!(matches!(
        auth,
        ActionAuthorization::Forbidden { role: denied } if denied == role
    ));
    // Denial happens before any mutation is attempted.
    assert!(!store.calls().contains(&"update_workspace_settings"));
}

#[test_log::test(tokio::test)]
async fn non_member_settings_update_is_not_found_not_forbidden() {
    let store = store_with_owner();
    let auth = access::authorize_settings_update(&store, UserId::from_u64(2), &"acme".into())
        .await
        .unwrap();
    assert!(matches!(auth, ActionAuthorization::NotFound));
}

#[test_log::test(tokio::test)]
async fn only_the_owner_may_delete() {
    let store = store_with_owner();
    store
        .state
        .lock()
        .unwrap()
        .memberships
        .push(support::membership(10, 2, WorkspaceRole::Admin));

    let owner = access::authorize_delete(&store, UserId::from_u64(1), &"acme".into())
        .await
        .unwrap();
    assert!(matches!(owner, ActionAuthorization::Granted { .. }));

    // An admin can rename the workspace but not delete it.
    let admin = access::authorize_delete(&store, UserId::from_u64(2), &"acme".into())
        .await
        .unwrap();
    assert!(matches!(
        admin,
        ActionAuthorization::Forbidden {
            role: WorkspaceRole::Admin
        }
    ));
}

#[test]
fn retired_slug_embeds_the_original() {
    let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    pretty_assert_eq!(
        access::retired_slug("acme", now),
        "acme-deleted-1700000000"
    );
}
