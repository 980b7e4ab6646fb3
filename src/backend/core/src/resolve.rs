//! Resolution layer: effective permissions, pruned menu trees and the fixed
//! vocabulary permission sets.
//!
//! Two independent paths can authorize a catalog action: the catalog itself
//! (does any active role the user holds include the action's menu?) and the
//! policy engine (is `(resource, code)` granted?). Action checks evaluate
//! both and report disagreement, since the facts are a derived index that
//! can drift from the catalog between rebuilds.

use metrics::counter;
use tracing::{debug, warn};

use crate::catalog::{build_menu_tree, MenuId, MenuNode, PermissionCatalog};
use crate::error::{DepotError, Result};
use crate::rbac::{
    Enforcer, GrantFact, PackageAction, ProjectAction, SidebarItem, ADMIN_ROLE, PACKAGE_OBJECT,
    PROJECT_OBJECT, SIDEBAR_OBJECT, WILDCARD_DOMAIN,
};
use crate::telemetry::metrics::DIVERGENCE_TOTAL;

/// Answers "what may this user do here" questions.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    catalog: PermissionCatalog,
    enforcer: Enforcer,
}

impl PermissionResolver {
    pub fn new(catalog: PermissionCatalog, enforcer: Enforcer) -> Self {
        Self { catalog, enforcer }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Catalog path
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether `user` holds the administrator role in the wildcard domain.
    pub async fn is_wildcard_admin(&self, user: &str) -> Result<bool> {
        let held = self
            .catalog
            .repository()
            .assignments_for_user(user, Some(WILDCARD_DOMAIN))
            .await?;
        Ok(held.iter().any(|a| a.role_code == ADMIN_ROLE))
    }

    /// Whether any active role `user` holds in `tenant` includes the menu.
    /// A wildcard administrator reaches every menu.
    pub async fn check_menu_permission(&self, user: &str, tenant: &str, menu_id: MenuId) -> Result<bool> {
        if user.is_empty() {
            return Err(DepotError::missing_field("user"));
        }
        if self.is_wildcard_admin(user).await? {
            return Ok(true);
        }
        Ok(self.catalog.user_menu_ids(user, tenant).await?.contains(&menu_id))
    }

    /// Check a catalog permission key for `user` in `tenant`.
    ///
    /// Returns the catalog decision. The engine decision for the same
    /// `(resource, code)` is computed alongside; a mismatch is logged and
    /// counted. Unknown keys are denied.
    pub async fn check_action_permission(&self, user: &str, tenant: &str, permission_key: &str) -> Result<bool> {
        let Some(action) = self.catalog.get_menu_action_by_key(permission_key).await? else {
            debug!(user, tenant, permission_key, "Unknown permission key, denied");
            return Ok(false);
        };

        let by_catalog = self.check_menu_permission(user, tenant, action.menu_id).await?;
        let by_engine = self
            .enforcer
            .enforce(user, tenant, &action.resource, &action.code)
            .await?;

        if by_catalog != by_engine {
            counter!(DIVERGENCE_TOTAL).increment(1);
            warn!(
                user,
                tenant,
                permission_key,
                resource = %action.resource,
                action = %action.code,
                by_catalog,
                by_engine,
                "Catalog and policy engine disagree; a rebuild may be due"
            );
        }
        Ok(by_catalog)
    }

    /// The user's menus in `tenant` as a pruned tree.
    pub async fn user_menu_tree(&self, user: &str, tenant: &str) -> Result<Vec<MenuNode>> {
        if self.is_wildcard_admin(user).await? {
            let menus = self
                .catalog
                .list_menus(Some(tenant))
                .await?
                .into_iter()
                .filter(|m| m.visible)
                .collect();
            return Ok(build_menu_tree(menus));
        }
        self.catalog.get_user_menu_tree(user, tenant).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Engine path
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn sidebar_permissions(&self, user: &str, tenant: &str) -> Result<Vec<SidebarItem>> {
        let items = SidebarItem::all();
        let requests: Vec<(&str, &str)> = items.iter().map(|i| (SIDEBAR_OBJECT, i.as_str())).collect();
        let allowed = self.enforcer.enforce_many(user, tenant, &requests).await?;
        Ok(pick(items, &allowed))
    }

    pub async fn project_permissions(&self, user: &str, tenant: &str) -> Result<Vec<ProjectAction>> {
        let actions = ProjectAction::all();
        let requests: Vec<(&str, &str)> = actions.iter().map(|a| (PROJECT_OBJECT, a.as_str())).collect();
        let allowed = self.enforcer.enforce_many(user, tenant, &requests).await?;
        Ok(pick(actions, &allowed))
    }

    pub async fn package_permissions(&self, user: &str, tenant: &str) -> Result<Vec<PackageAction>> {
        let actions = PackageAction::all();
        let requests: Vec<(&str, &str)> = actions.iter().map(|a| (PACKAGE_OBJECT, a.as_str())).collect();
        let allowed = self.enforcer.enforce_many(user, tenant, &requests).await?;
        Ok(pick(actions, &allowed))
    }

    /// Raw grant tuples that can authorize `user` in `domain`.
    pub async fn effective_permissions(&self, user: &str, domain: &str) -> Result<Vec<GrantFact>> {
        self.enforcer.effective_permissions(user, domain).await
    }

    /// Catalog permission keys whose `(resource, code)` the engine grants.
    pub async fn effective_permission_keys(&self, user: &str, domain: &str) -> Result<Vec<String>> {
        let actions = self.catalog.list_all_menu_actions().await?;
        if actions.is_empty() {
            return Ok(Vec::new());
        }
        let requests: Vec<(&str, &str)> = actions
            .iter()
            .map(|a| (a.resource.as_str(), a.code.as_str()))
            .collect();
        let allowed = self.enforcer.enforce_many(user, domain, &requests).await?;

        let mut keys: Vec<String> = actions
            .iter()
            .zip(allowed)
            .filter(|(_, ok)| *ok)
            .map(|(a, _)| a.permission_key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn pick<T: Copy>(items: &[T], allowed: &[bool]) -> Vec<T> {
    items
        .iter()
        .zip(allowed)
        .filter(|(_, ok)| **ok)
        .map(|(item, _)| *item)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{HttpMethod, InMemoryCatalog, NewMenu, NewMenuAction};
    use crate::rbac::{MemoryAdapter, PolicyStore};
    use crate::sync::Synchronizer;
    use std::sync::Arc;

    async fn setup() -> (PermissionResolver, Synchronizer, PermissionCatalog) {
        let catalog = PermissionCatalog::new(Arc::new(InMemoryCatalog::new()));
        let store = PolicyStore::open(Arc::new(MemoryAdapter::new())).await.unwrap();
        let enforcer = Enforcer::new(store.clone());
        (
            PermissionResolver::new(catalog.clone(), enforcer),
            Synchronizer::new(catalog.clone(), store),
            catalog,
        )
    }

    #[tokio::test]
    async fn test_viewer_vocabularies() {
        let (resolver, sync, _) = setup().await;
        sync.initialize_role_permissions_for_tenant("t1").await.unwrap();
        sync.assign_role_to_user("u1", "viewer", "t1").await.unwrap();

        let sidebar = resolver.sidebar_permissions("u1", "t1").await.unwrap();
        assert!(sidebar.contains(&SidebarItem::Dashboard));
        assert!(!sidebar.contains(&SidebarItem::Settings));
        assert_eq!(
            resolver.project_permissions("u1", "t1").await.unwrap(),
            vec![ProjectAction::Read]
        );
        assert_eq!(
            resolver.package_permissions("u1", "t1").await.unwrap(),
            vec![PackageAction::Read, PackageAction::Download]
        );
        assert!(resolver.package_permissions("u1", "t2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_key_denied() {
        let (resolver, _, _) = setup().await;
        assert!(!resolver.check_action_permission("u1", "t1", "nope:read").await.unwrap());
    }

    #[tokio::test]
    async fn test_catalog_decision_returned_on_divergence() {
        let (resolver, sync, catalog) = setup().await;
        sync.initialize_role_permissions_for_tenant("t1").await.unwrap();
        let viewer = catalog.resolve_role("t1", "viewer").await.unwrap().unwrap();
        let menu = catalog.create_menu(NewMenu::new("Docs", "/docs")).await.unwrap();
        catalog
            .create_menu_action(NewMenuAction::new(menu.id, "read", "docs", HttpMethod::Get, "docs:read"))
            .await
            .unwrap();
        // Linked in the catalog only; the grant is never synced.
        catalog.assign_menus_to_role(viewer.id, &[menu.id]).await.unwrap();
        sync.assign_role_to_user("u1", "viewer", "t1").await.unwrap();

        assert!(resolver.check_action_permission("u1", "t1", "docs:read").await.unwrap());
        assert!(resolver.effective_permission_keys("u1", "t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wildcard_admin_sees_everything() {
        let (resolver, sync, catalog) = setup().await;
        let menu = catalog.create_menu(NewMenu::new("Docs", "/docs")).await.unwrap();
        catalog
            .create_menu_action(NewMenuAction::new(menu.id, "read", "docs", HttpMethod::Get, "docs:read"))
            .await
            .unwrap();
        sync.initialize_system_admin_permissions().await.unwrap();
        sync.assign_role_to_user("root", ADMIN_ROLE, "*").await.unwrap();

        assert!(resolver.check_action_permission("root", "t9", "docs:read").await.unwrap());
        assert_eq!(
            resolver.effective_permission_keys("root", "t9").await.unwrap(),
            vec!["docs:read".to_string()]
        );
        assert_eq!(resolver.user_menu_tree("root", "t9").await.unwrap().len(), 1);
        assert_eq!(
            resolver.sidebar_permissions("root", "t9").await.unwrap().len(),
            SidebarItem::all().len()
        );
    }
}
