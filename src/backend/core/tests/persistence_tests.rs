//! Persistence boundary tests: rollback on adapter failure and durability
//! of the file backend across restarts.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use depot_core::catalog::{HttpMethod, InMemoryCatalog, NewMenu, NewMenuAction, NewRole, Role};
use depot_core::error::{DepotError, ErrorCode, Result};
use depot_core::rbac::{
    FactChange, FactSet, FactSnapshot, FileAdapter, MemoryAdapter, PolicyAdapter,
};
use depot_core::AuthzCore;

// ============================================================================
// Test Utilities
// ============================================================================

/// Wraps a [`MemoryAdapter`] and lets through only `allowance` more writes.
struct FlakyAdapter {
    inner: MemoryAdapter,
    allowance: AtomicUsize,
}

impl Default for FlakyAdapter {
    fn default() -> Self {
        Self {
            inner: MemoryAdapter::new(),
            allowance: AtomicUsize::new(usize::MAX),
        }
    }
}

impl FlakyAdapter {
    fn fail(&self, on: bool) {
        self.allowance
            .store(if on { 0 } else { usize::MAX }, Ordering::SeqCst);
    }

    /// Accept `writes` more writes, then fail every one after.
    fn fail_after(&self, writes: usize) {
        self.allowance.store(writes, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        let granted = self
            .allowance
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if !granted {
            return Err(DepotError::policy_write("injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyAdapter for FlakyAdapter {
    async fn load(&self) -> Result<FactSnapshot> {
        self.inner.load().await
    }

    async fn save(&self, snapshot: &FactSnapshot) -> Result<()> {
        self.check()?;
        self.inner.save(snapshot).await
    }

    async fn apply(&self, changes: &[FactChange], facts: &FactSet) -> Result<()> {
        self.check()?;
        self.inner.apply(changes, facts).await
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

async fn flaky_core() -> (AuthzCore, Arc<FlakyAdapter>) {
    let adapter = Arc::new(FlakyAdapter::default());
    let core = AuthzCore::new(Arc::new(InMemoryCatalog::new()), adapter.clone())
        .await
        .unwrap();
    (core, adapter)
}

/// A tenant role `qa` in `t1` linked to a menu whose action is `suite:run`.
async fn qa_role(core: &AuthzCore) -> Role {
    let role = core.create_role(NewRole::tenant("t1", "qa", "QA")).await.unwrap();
    let menu = suite_menu(core, "Tests", "suite", "run").await;
    core.assign_menus_to_role(role.id, &[menu]).await.unwrap();
    role
}

async fn suite_menu(core: &AuthzCore, name: &str, resource: &str, action: &str) -> i64 {
    let menu = core
        .create_menu(NewMenu::new(name, format!("/{}", resource)))
        .await
        .unwrap();
    core.create_menu_action(NewMenuAction::new(
        menu.id,
        action,
        resource,
        HttpMethod::Post,
        format!("{}:{}", resource, action),
    ))
    .await
    .unwrap();
    menu.id
}

// ============================================================================
// Rollback
// ============================================================================

#[tokio::test]
async fn test_failed_write_leaves_no_fact() {
    let (core, adapter) = flaky_core().await;
    adapter.fail(true);

    let err = core.add_grant("owner", "t1", "project", "update").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PolicyStoreWriteFailed);
    assert_eq!(core.store().grant_count().await, 0);
    assert!(!core.enforce("owner", "t1", "project", "update").await.unwrap());

    adapter.fail(false);
    assert!(core.add_grant("owner", "t1", "project", "update").await.unwrap());
}

#[tokio::test]
async fn test_failed_removal_keeps_fact() {
    let (core, adapter) = flaky_core().await;
    core.add_grouping("u1", "owner", "t1").await.unwrap();

    adapter.fail(true);
    assert!(core.remove_grouping("u1", "owner", "t1").await.is_err());
    assert_eq!(core.roles_of("u1", "t1").await, vec!["owner".to_string()]);
}

#[tokio::test]
async fn test_assignment_compensated_on_grouping_failure() {
    let (core, adapter) = flaky_core().await;
    core.initialize_role_permissions_for_tenant("t1").await.unwrap();

    adapter.fail(true);
    let err = core.assign_role_to_user("u1", "viewer", "t1").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PolicyStoreWriteFailed);
    assert!(core.list_assignments("u1", "t1").await.unwrap().is_empty());
    assert!(core.roles_of("u1", "t1").await.is_empty());

    adapter.fail(false);
    core.assign_role_to_user("u1", "viewer", "t1").await.unwrap();
    assert_eq!(core.list_assignments("u1", "t1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unassignment_restored_on_grouping_failure() {
    let (core, adapter) = flaky_core().await;
    core.initialize_role_permissions_for_tenant("t1").await.unwrap();
    core.assign_role_to_user("u1", "viewer", "t1").await.unwrap();

    adapter.fail(true);
    assert!(core
        .remove_role_from_users("viewer", "t1", &["u1".to_string()])
        .await
        .is_err());
    assert_eq!(core.list_assignments("u1", "t1").await.unwrap().len(), 1);
    assert!(core.enforce("u1", "t1", "package", "download").await.unwrap());
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_facts() {
    let (core, adapter) = flaky_core().await;
    core.add_grant("stray", "t1", "project", "delete").await.unwrap();

    adapter.fail(true);
    assert!(core.rebuild().await.is_err());
    assert!(core.enforce("stray", "t1", "project", "delete").await.unwrap());
}

#[tokio::test]
async fn test_failed_reactivation_adds_no_groupings() {
    let (core, adapter) = flaky_core().await;
    let role = qa_role(&core).await;
    core.assign_role_to_user("u1", "qa", "t1").await.unwrap();
    core.assign_role_to_user("u2", "qa", "t1").await.unwrap();
    core.set_role_active(role.id, false).await.unwrap();

    // A menu linked while inactive gives reactivation a grant write to make
    // before the grouping write.
    let extra = suite_menu(&core, "Reports", "report", "read").await;
    core.catalog().assign_menus_to_role(role.id, &[extra]).await.unwrap();

    adapter.fail_after(1);
    assert!(core.set_role_active(role.id, true).await.is_err());

    assert!(!core.get_role(role.id).await.unwrap().is_active);
    assert!(core.users_of("qa", "t1").await.is_empty());
    for user in ["u1", "u2"] {
        assert!(!core.enforce(user, "t1", "suite", "run").await.unwrap());
        assert!(!core.check_action_permission(user, "t1", "suite:run").await.unwrap());
    }

    adapter.fail(false);
    core.set_role_active(role.id, true).await.unwrap();
    assert_eq!(core.users_of("qa", "t1").await.len(), 2);
    assert!(core.enforce("u2", "t1", "report", "read").await.unwrap());
}

#[tokio::test]
async fn test_failed_role_delete_keeps_role_and_facts() {
    let (core, adapter) = flaky_core().await;
    let role = qa_role(&core).await;
    assert_eq!(core.store().grant_count().await, 1);

    adapter.fail(true);
    let err = core.delete_role(role.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PolicyStoreWriteFailed);
    assert_eq!(core.get_role(role.id).await.unwrap().code, "qa");
    assert_eq!(core.store().grant_count().await, 1);

    adapter.fail(false);
    core.delete_role(role.id).await.unwrap();
    assert_eq!(core.store().grant_count().await, 0);

    // A new role reusing the code starts without the old grants.
    core.create_role(NewRole::tenant("t1", "qa", "QA")).await.unwrap();
    core.assign_role_to_user("u9", "qa", "t1").await.unwrap();
    assert!(!core.enforce("u9", "t1", "suite", "run").await.unwrap());
}

// ============================================================================
// File backend
// ============================================================================

#[tokio::test]
async fn test_file_backend_reloads_facts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("policy.json");

    {
        let core = AuthzCore::with_policy_file(&path).await.unwrap();
        core.add_grant("admin", "*", "project", "delete").await.unwrap();
        core.add_grouping("root", "admin", "*").await.unwrap();
        core.add_grant("auditor", "", "audit_log", "read").await.unwrap();
        core.remove_grant("admin", "*", "project", "delete").await.unwrap();
        core.add_grant("admin", "*", "project", "update").await.unwrap();
    }

    let reopened = AuthzCore::with_policy_file(&path).await.unwrap();
    assert!(reopened.store().is_durable());
    assert!(reopened.enforce("root", "t3", "project", "update").await.unwrap());
    assert!(!reopened.enforce("root", "t3", "project", "delete").await.unwrap());
    assert_eq!(reopened.store().grant_count().await, 2);
}

#[tokio::test]
async fn test_corrupt_policy_file_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let err = AuthzCore::new(Arc::new(InMemoryCatalog::new()), Arc::new(FileAdapter::new(&path)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PolicyStoreLoadFailed);
}
