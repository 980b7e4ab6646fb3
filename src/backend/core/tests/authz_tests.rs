//! Integration tests for the authorization core.
//!
//! These tests drive the public [`AuthzCore`] handle end to end: catalog
//! edits flow through the synchronizer into the policy store and are
//! observed through the engine and the resolution layer.

use depot_core::catalog::{HttpMethod, MenuUpdate, NewMenu, NewMenuAction, NewRole};
use depot_core::config::Config;
use depot_core::error::ErrorCode;
use depot_core::rbac::{GrantFact, MatchPath, PolicyDecision, ADMIN_ROLE};
use depot_core::AuthzCore;

// ============================================================================
// Test Utilities
// ============================================================================

async fn core() -> AuthzCore {
    AuthzCore::in_memory().await.unwrap()
}

/// A menu with one `read` action keyed `<resource>:read`.
async fn menu_with_action(core: &AuthzCore, name: &str, resource: &str) -> i64 {
    let menu = core
        .create_menu(NewMenu::new(name, format!("/{}", resource)))
        .await
        .unwrap();
    core.create_menu_action(NewMenuAction::new(
        menu.id,
        "read",
        resource,
        HttpMethod::Get,
        format!("{}:read", resource),
    ))
    .await
    .unwrap();
    menu.id
}

// ============================================================================
// Policy Store
// ============================================================================

#[tokio::test]
async fn test_grant_is_idempotent() {
    let core = core().await;

    assert!(core.add_grant("owner", "t1", "project", "update").await.unwrap());
    assert!(!core.add_grant("owner", "t1", "project", "update").await.unwrap());

    let grants = core.store().all_grants().await;
    let matching = grants
        .iter()
        .filter(|g| **g == GrantFact::new("owner", "t1", "project", "update"))
        .count();
    assert_eq!(matching, 1);
}

#[tokio::test]
async fn test_remove_absent_fact_reports_false() {
    let core = core().await;
    assert!(!core.remove_grant("owner", "t1", "project", "update").await.unwrap());
    assert!(!core.remove_grouping("u1", "owner", "t1").await.unwrap());
}

#[tokio::test]
async fn test_empty_fields_rejected() {
    let core = core().await;

    let err = core.add_grant("", "t1", "project", "read").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingRequiredField);
    let err = core.enforce("u1", "t1", "", "read").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingRequiredField);
    let err = core.add_grouping("u1", "", "t1").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingRequiredField);

    assert_eq!(core.store().grant_count().await, 0);
}

// ============================================================================
// Enforcement
// ============================================================================

#[tokio::test]
async fn test_role_inheritance_is_tenant_scoped() {
    let core = core().await;
    core.add_grouping("u1", "owner", "t1").await.unwrap();
    core.add_grant("owner", "t1", "project", "update").await.unwrap();

    assert!(core.enforce("u1", "t1", "project", "update").await.unwrap());
    assert!(!core.enforce("u1", "t2", "project", "update").await.unwrap());
}

#[tokio::test]
async fn test_wildcard_admin_reaches_every_tenant() {
    let core = core().await;
    core.add_grant(ADMIN_ROLE, "*", "project", "update").await.unwrap();
    core.add_grouping("root", ADMIN_ROLE, "*").await.unwrap();

    for tenant in ["t1", "t2", "never-seen", ""] {
        assert!(
            core.enforce("root", tenant, "project", "update").await.unwrap(),
            "wildcard admin denied in '{}'",
            tenant
        );
    }
    assert!(!core.enforce("root", "t1", "project", "delete").await.unwrap());
}

#[tokio::test]
async fn test_decision_reports_match_path() {
    let core = core().await;
    core.add_grant("u1", "t1", "package", "read").await.unwrap();
    core.add_grant("owner", "t1", "package", "publish").await.unwrap();
    core.add_grouping("u1", "owner", "t1").await.unwrap();

    let enforcer = core.enforcer();
    assert_eq!(
        enforcer.decide("u1", "t1", "package", "read").await.unwrap(),
        PolicyDecision::Allow(MatchPath::Direct)
    );
    assert_eq!(
        enforcer.decide("u1", "t1", "package", "publish").await.unwrap(),
        PolicyDecision::Allow(MatchPath::Role("owner".to_string()))
    );
    assert_eq!(
        enforcer.decide("u1", "t1", "package", "delete").await.unwrap(),
        PolicyDecision::Deny
    );
}

#[tokio::test]
async fn test_system_domain_is_isolated() {
    let core = core().await;
    core.add_grant("auditor", "", "audit_log", "read").await.unwrap();
    core.add_grouping("u1", "auditor", "").await.unwrap();
    core.add_grouping("u2", "auditor", "t1").await.unwrap();

    assert!(core.enforce("u1", "", "audit_log", "read").await.unwrap());
    assert!(!core.enforce("u1", "t1", "audit_log", "read").await.unwrap());
    assert!(!core.enforce("u2", "t1", "audit_log", "read").await.unwrap());
    assert!(!core.enforce("u2", "", "audit_log", "read").await.unwrap());
}

// ============================================================================
// Catalog + Synchronizer
// ============================================================================

#[tokio::test]
async fn test_menu_tree_is_pruned() {
    let core = core().await;
    let role = core.create_role(NewRole::tenant("t1", "editor", "Editor")).await.unwrap();

    let a = core.create_menu(NewMenu::new("A", "/a")).await.unwrap();
    let child1 = core
        .create_menu(NewMenu::new("A.child1", "/a/1").under(a.id).sorted(1))
        .await
        .unwrap();
    core.create_menu(NewMenu::new("A.child2", "/a/2").under(a.id).sorted(2))
        .await
        .unwrap();

    core.assign_menus_to_role(role.id, &[a.id, child1.id]).await.unwrap();
    core.assign_role_to_user("u1", "editor", "t1").await.unwrap();

    let tree = core.user_menu_tree("u1", "t1").await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].menu.id, a.id);
    assert_eq!(tree[0].children.len(), 1);
    assert_eq!(tree[0].children[0].menu.id, child1.id);
    assert!(tree[0].children[0].children.is_empty());

    assert!(core.user_menu_tree("u1", "t2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_hidden_menus_are_omitted() {
    let core = core().await;
    let role = core.create_role(NewRole::tenant("t1", "editor", "Editor")).await.unwrap();
    let shown = core.create_menu(NewMenu::new("Shown", "/shown")).await.unwrap();
    let hidden = core.create_menu(NewMenu::new("Hidden", "/hidden").hidden()).await.unwrap();
    core.assign_menus_to_role(role.id, &[shown.id, hidden.id]).await.unwrap();
    core.assign_role_to_user("u1", "editor", "t1").await.unwrap();

    let tree = core.user_menu_tree("u1", "t1").await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].menu.id, shown.id);
    assert!(core.check_menu_permission("u1", "t1", hidden.id).await.unwrap());
}

#[tokio::test]
async fn test_assigned_role_cannot_be_deleted() {
    let core = core().await;
    let role = core.create_role(NewRole::tenant("t1", "editor", "Editor")).await.unwrap();
    core.assign_role_to_user("u1", "editor", "t1").await.unwrap();

    let err = core.delete_role(role.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReferentialViolation);
    assert!(core.get_role(role.id).await.is_ok());
    assert_eq!(core.list_role_assignments("editor", "t1").await.unwrap().len(), 1);

    core.remove_role_from_users("editor", "t1", &["u1".to_string()])
        .await
        .unwrap();
    core.delete_role(role.id).await.unwrap();
    assert_eq!(
        core.get_role(role.id).await.unwrap_err().code(),
        ErrorCode::RecordNotFound
    );
}

#[tokio::test]
async fn test_default_roles_are_protected() {
    let core = core().await;
    core.initialize_role_permissions_for_tenant("t1").await.unwrap();
    let owner = core
        .list_roles(Some("t1"))
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.code == "owner")
        .unwrap();

    assert_eq!(
        core.delete_role(owner.id).await.unwrap_err().code(),
        ErrorCode::SystemProtected
    );
    assert_eq!(
        core.set_role_active(owner.id, false).await.unwrap_err().code(),
        ErrorCode::SystemProtected
    );
}

#[tokio::test]
async fn test_incremental_sync_is_additive() {
    let core = core().await;
    let role = core.create_role(NewRole::tenant("t1", "editor", "Editor")).await.unwrap();
    let docs = menu_with_action(&core, "Docs", "docs").await;
    let wiki = menu_with_action(&core, "Wiki", "wiki").await;
    core.assign_menus_to_role(role.id, &[docs, wiki]).await.unwrap();
    core.assign_role_to_user("u1", "editor", "t1").await.unwrap();

    core.remove_menus_from_role(role.id, &[wiki]).await.unwrap();
    let role = core.get_role(role.id).await.unwrap();
    assert_eq!(core.sync_role_permissions(&role).await.unwrap(), 0);
    assert_eq!(core.sync_role_permissions(&role).await.unwrap(), 0);

    // The unlinked menu's grant survives incremental sync.
    assert!(core.enforce("u1", "t1", "wiki", "read").await.unwrap());
    assert!(!core.check_action_permission("u1", "t1", "wiki:read").await.unwrap());

    // A rebuild converges the facts on the catalog.
    core.rebuild().await.unwrap();
    assert!(!core.enforce("u1", "t1", "wiki", "read").await.unwrap());
    assert!(core.enforce("u1", "t1", "docs", "read").await.unwrap());
}

#[tokio::test]
async fn test_viewer_dashboard_scenario() {
    let core = core().await;
    core.initialize_role_permissions_for_tenant("T1").await.unwrap();
    let viewer = core
        .list_roles(Some("T1"))
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.code == "viewer")
        .unwrap();
    let dashboard = menu_with_action(&core, "Dashboard", "dashboard").await;
    core.assign_menus_to_role(viewer.id, &[dashboard]).await.unwrap();
    core.assign_role_to_user("u1", "viewer", "T1").await.unwrap();

    assert!(core.check_action_permission("u1", "T1", "dashboard:read").await.unwrap());
    assert!(!core.check_action_permission("u1", "T2", "dashboard:read").await.unwrap());
    assert!(!core.enforce("u1", "T1", "dashboard", "write").await.unwrap());
    assert_eq!(
        core.effective_permission_keys("u1", "T1").await.unwrap(),
        vec!["dashboard:read".to_string()]
    );
}

#[tokio::test]
async fn test_deactivated_role_stops_authorizing() {
    let core = core().await;
    let role = core.create_role(NewRole::tenant("t1", "editor", "Editor")).await.unwrap();
    let docs = menu_with_action(&core, "Docs", "docs").await;
    core.assign_menus_to_role(role.id, &[docs]).await.unwrap();
    core.assign_role_to_user("u1", "editor", "t1").await.unwrap();

    core.set_role_active(role.id, false).await.unwrap();
    assert!(!core.enforce("u1", "t1", "docs", "read").await.unwrap());
    assert!(!core.check_action_permission("u1", "t1", "docs:read").await.unwrap());
    assert!(core.roles_of("u1", "t1").await.is_empty());

    // A rebuild keeps inactive roles out.
    core.rebuild().await.unwrap();
    assert!(!core.enforce("u1", "t1", "docs", "read").await.unwrap());

    core.set_role_active(role.id, true).await.unwrap();
    assert!(core.enforce("u1", "t1", "docs", "read").await.unwrap());
    assert_eq!(core.roles_of("u1", "t1").await, vec!["editor".to_string()]);
}

#[tokio::test]
async fn test_menu_reparent_cycle_rejected() {
    let core = core().await;
    let a = core.create_menu(NewMenu::new("A", "/a")).await.unwrap();
    let b = core.create_menu(NewMenu::new("B", "/b").under(a.id)).await.unwrap();

    let update = MenuUpdate {
        parent_id: Some(Some(b.id)),
        ..Default::default()
    };
    let err = core.update_menu(a.id, update).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReferentialViolation);

    let err = core.delete_menu(a.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReferentialViolation);
}

#[tokio::test]
async fn test_rebuild_matches_catalog() {
    let core = core().await;
    core.initialize_system_admin_permissions().await.unwrap();
    core.initialize_role_permissions_for_tenant("t1").await.unwrap();
    core.assign_role_to_user("u1", "owner", "t1").await.unwrap();
    core.assign_role_to_user("root", ADMIN_ROLE, "*").await.unwrap();
    core.add_grant("stray", "t1", "project", "delete").await.unwrap();

    let before = core.store().grant_count().await;
    let report = core.rebuild().await.unwrap();
    assert_eq!(report.grants, before - 1);
    assert_eq!(report.groupings, 2);
    assert!(!core.enforce("stray", "t1", "project", "delete").await.unwrap());
    assert!(core.enforce("u1", "t1", "project", "delete").await.unwrap());
    assert!(core.enforce("root", "t9", "project", "delete").await.unwrap());

    // Rebuilding twice is a fixed point.
    assert_eq!(core.rebuild().await.unwrap(), report);
}

// ============================================================================
// Process-wide handle
// ============================================================================

#[tokio::test]
async fn test_global_handle_initializes_once() {
    let mut config = Config::in_memory();
    config.bootstrap.tenants = vec!["t1".to_string()];
    let first = AuthzCore::init_global(&config).await.unwrap();

    config.bootstrap.tenants = vec!["t2".to_string()];
    let second = AuthzCore::init_global(&config).await.unwrap();

    assert!(std::ptr::eq(first, second));
    assert!(AuthzCore::global().is_some());
    let t2_roles = second.list_roles(Some("t2")).await.unwrap();
    assert!(t2_roles.iter().all(|r| r.tenant_id.is_none()));
}
