//! Catalog persistence.
//!
//! [`CatalogRepository`] is the storage seam for catalog records. The
//! repository enforces the same uniqueness constraints the SQL schema does so
//! both backends report conflicts identically; business rules (system
//! protection, tenant ownership, deletion guards) live in
//! [`PermissionCatalog`](super::service::PermissionCatalog).

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::models::{
    Menu, MenuAction, MenuActionId, MenuId, NewMenu, NewMenuAction, NewRole, Role, RoleId,
    UserTenantRole,
};
use crate::error::{DepotError, Result};

/// Storage backend for catalog records.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_role(&self, role: NewRole) -> Result<Role>;
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>>;
    /// Find a role by its exact owner (`None` = system role) and code.
    async fn find_role(&self, tenant_id: Option<&str>, code: &str) -> Result<Option<Role>>;
    /// Every role carrying `code`, system or tenant owned.
    async fn roles_with_code(&self, code: &str) -> Result<Vec<Role>>;
    async fn list_roles(&self) -> Result<Vec<Role>>;
    async fn update_role(&self, role: &Role) -> Result<Role>;
    /// Delete a role together with its menu links.
    async fn delete_role(&self, id: RoleId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Menus
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_menu(&self, menu: NewMenu) -> Result<Menu>;
    async fn get_menu(&self, id: MenuId) -> Result<Option<Menu>>;
    async fn list_menus(&self) -> Result<Vec<Menu>>;
    async fn child_count(&self, id: MenuId) -> Result<usize>;
    async fn update_menu(&self, menu: &Menu) -> Result<Menu>;
    /// Delete a menu together with its actions and role links.
    async fn delete_menu(&self, id: MenuId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Menu actions
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_action(&self, action: NewMenuAction) -> Result<MenuAction>;
    async fn get_action(&self, id: MenuActionId) -> Result<Option<MenuAction>>;
    async fn find_action_by_key(&self, permission_key: &str) -> Result<Option<MenuAction>>;
    async fn list_actions(&self, menu_id: Option<MenuId>) -> Result<Vec<MenuAction>>;
    async fn update_action(&self, action: &MenuAction) -> Result<MenuAction>;
    async fn delete_action(&self, id: MenuActionId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Role ↔ menu links
    // ─────────────────────────────────────────────────────────────────────────

    /// Link menus to a role, ignoring existing links. Returns new links.
    async fn link_menus(&self, role_id: RoleId, menu_ids: &[MenuId]) -> Result<usize>;
    /// Unlink menus from a role, ignoring absent links. Returns removed links.
    async fn unlink_menus(&self, role_id: RoleId, menu_ids: &[MenuId]) -> Result<usize>;
    async fn role_menu_ids(&self, role_id: RoleId) -> Result<Vec<MenuId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Assignments
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_assignment(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_code: &str,
    ) -> Result<UserTenantRole>;
    async fn delete_assignment(&self, user_id: &str, tenant_id: &str, role_code: &str)
        -> Result<bool>;
    /// Assignments of `user_id`; `tenant_id = None` spans every tenant.
    async fn assignments_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<UserTenantRole>>;
    /// Assignments of `role_code`; `tenant_id = None` spans every tenant.
    async fn assignments_for_role(
        &self,
        role_code: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<UserTenantRole>>;
    async fn list_assignments(&self) -> Result<Vec<UserTenantRole>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory implementation
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct CatalogState {
    next_id: i64,
    roles: BTreeMap<RoleId, Role>,
    menus: BTreeMap<MenuId, Menu>,
    actions: BTreeMap<MenuActionId, MenuAction>,
    role_menus: BTreeSet<(RoleId, MenuId)>,
    assignments: BTreeMap<i64, UserTenantRole>,
}

impl CatalogState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn role_conflict(&self, tenant_id: Option<&str>, code: &str, except: Option<RoleId>) -> bool {
        self.roles.values().any(|r| {
            Some(r.id) != except && r.tenant_id.as_deref() == tenant_id && r.code == code
        })
    }

    fn menu_conflict(&self, menu: &Menu) -> Result<()> {
        for other in self.menus.values() {
            if other.id == menu.id || other.tenant_id != menu.tenant_id {
                continue;
            }
            if other.name == menu.name {
                return Err(DepotError::duplicate("menu", "name", &menu.name));
            }
            if other.path == menu.path {
                return Err(DepotError::duplicate("menu", "path", &menu.path));
            }
        }
        Ok(())
    }

    fn key_conflict(&self, key: &str, except: Option<MenuActionId>) -> bool {
        self.actions
            .values()
            .any(|a| Some(a.id) != except && a.permission_key == key)
    }
}

/// Catalog held in process memory. Used by tests and the `memory` backend.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalog {
    async fn insert_role(&self, role: NewRole) -> Result<Role> {
        let mut state = self.state.write().await;
        if state.role_conflict(role.tenant_id.as_deref(), &role.code, None) {
            return Err(DepotError::duplicate("role", "code", &role.code));
        }
        let now = Utc::now();
        let record = Role {
            id: state.next_id(),
            code: role.code,
            name: role.name,
            description: role.description,
            tenant_id: role.tenant_id,
            is_system: role.is_system,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.roles.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn find_role(&self, tenant_id: Option<&str>, code: &str) -> Result<Option<Role>> {
        let state = self.state.read().await;
        Ok(state
            .roles
            .values()
            .find(|r| r.tenant_id.as_deref() == tenant_id && r.code == code)
            .cloned())
    }

    async fn roles_with_code(&self, code: &str) -> Result<Vec<Role>> {
        let state = self.state.read().await;
        Ok(state.roles.values().filter(|r| r.code == code).cloned().collect())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self.state.read().await.roles.values().cloned().collect())
    }

    async fn update_role(&self, role: &Role) -> Result<Role> {
        let mut state = self.state.write().await;
        if !state.roles.contains_key(&role.id) {
            return Err(DepotError::not_found("role", role.id));
        }
        let mut record = role.clone();
        record.updated_at = Utc::now();
        state.roles.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_role(&self, id: RoleId) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.roles.remove(&id).is_none() {
            return Ok(false);
        }
        state.role_menus.retain(|(role_id, _)| *role_id != id);
        Ok(true)
    }

    async fn insert_menu(&self, menu: NewMenu) -> Result<Menu> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let record = Menu {
            id: 0,
            name: menu.name,
            path: menu.path,
            sort: menu.sort,
            visible: menu.visible,
            is_system: menu.is_system,
            tenant_id: menu.tenant_id,
            parent_id: menu.parent_id,
            created_at: now,
            updated_at: now,
        };
        state.menu_conflict(&record)?;
        let record = Menu {
            id: state.next_id(),
            ..record
        };
        state.menus.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_menu(&self, id: MenuId) -> Result<Option<Menu>> {
        Ok(self.state.read().await.menus.get(&id).cloned())
    }

    async fn list_menus(&self) -> Result<Vec<Menu>> {
        Ok(self.state.read().await.menus.values().cloned().collect())
    }

    async fn child_count(&self, id: MenuId) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state
            .menus
            .values()
            .filter(|m| m.parent_id == Some(id))
            .count())
    }

    async fn update_menu(&self, menu: &Menu) -> Result<Menu> {
        let mut state = self.state.write().await;
        if !state.menus.contains_key(&menu.id) {
            return Err(DepotError::not_found("menu", menu.id));
        }
        state.menu_conflict(menu)?;
        let mut record = menu.clone();
        record.updated_at = Utc::now();
        state.menus.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_menu(&self, id: MenuId) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.menus.remove(&id).is_none() {
            return Ok(false);
        }
        state.actions.retain(|_, a| a.menu_id != id);
        state.role_menus.retain(|(_, menu_id)| *menu_id != id);
        Ok(true)
    }

    async fn insert_action(&self, action: NewMenuAction) -> Result<MenuAction> {
        let mut state = self.state.write().await;
        if !state.menus.contains_key(&action.menu_id) {
            return Err(DepotError::not_found("menu", action.menu_id));
        }
        if state.key_conflict(&action.permission_key, None) {
            return Err(DepotError::duplicate(
                "menu action",
                "permission_key",
                &action.permission_key,
            ));
        }
        let record = MenuAction {
            id: state.next_id(),
            menu_id: action.menu_id,
            code: action.code,
            resource: action.resource,
            method: action.method,
            permission_key: action.permission_key,
            is_system: action.is_system,
            created_at: Utc::now(),
        };
        state.actions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_action(&self, id: MenuActionId) -> Result<Option<MenuAction>> {
        Ok(self.state.read().await.actions.get(&id).cloned())
    }

    async fn find_action_by_key(&self, permission_key: &str) -> Result<Option<MenuAction>> {
        let state = self.state.read().await;
        Ok(state
            .actions
            .values()
            .find(|a| a.permission_key == permission_key)
            .cloned())
    }

    async fn list_actions(&self, menu_id: Option<MenuId>) -> Result<Vec<MenuAction>> {
        let state = self.state.read().await;
        Ok(state
            .actions
            .values()
            .filter(|a| menu_id.map_or(true, |m| a.menu_id == m))
            .cloned()
            .collect())
    }

    async fn update_action(&self, action: &MenuAction) -> Result<MenuAction> {
        let mut state = self.state.write().await;
        if !state.actions.contains_key(&action.id) {
            return Err(DepotError::not_found("menu action", action.id));
        }
        if state.key_conflict(&action.permission_key, Some(action.id)) {
            return Err(DepotError::duplicate(
                "menu action",
                "permission_key",
                &action.permission_key,
            ));
        }
        state.actions.insert(action.id, action.clone());
        Ok(action.clone())
    }

    async fn delete_action(&self, id: MenuActionId) -> Result<bool> {
        Ok(self.state.write().await.actions.remove(&id).is_some())
    }

    async fn link_menus(&self, role_id: RoleId, menu_ids: &[MenuId]) -> Result<usize> {
        let mut state = self.state.write().await;
        if !state.roles.contains_key(&role_id) {
            return Err(DepotError::not_found("role", role_id));
        }
        if let Some(missing) = menu_ids.iter().find(|id| !state.menus.contains_key(id)) {
            return Err(DepotError::not_found("menu", missing));
        }
        Ok(menu_ids
            .iter()
            .filter(|menu_id| state.role_menus.insert((role_id, **menu_id)))
            .count())
    }

    async fn unlink_menus(&self, role_id: RoleId, menu_ids: &[MenuId]) -> Result<usize> {
        let mut state = self.state.write().await;
        Ok(menu_ids
            .iter()
            .filter(|menu_id| state.role_menus.remove(&(role_id, **menu_id)))
            .count())
    }

    async fn role_menu_ids(&self, role_id: RoleId) -> Result<Vec<MenuId>> {
        let state = self.state.read().await;
        Ok(state
            .role_menus
            .range((role_id, MenuId::MIN)..=(role_id, MenuId::MAX))
            .map(|(_, menu_id)| *menu_id)
            .collect())
    }

    async fn insert_assignment(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_code: &str,
    ) -> Result<UserTenantRole> {
        let mut state = self.state.write().await;
        let exists = state.assignments.values().any(|a| {
            a.user_id == user_id && a.tenant_id == tenant_id && a.role_code == role_code
        });
        if exists {
            return Err(DepotError::duplicate(
                "user tenant role",
                "user_tenant_role",
                format!("{}/{}/{}", user_id, tenant_id, role_code),
            ));
        }
        let record = UserTenantRole {
            id: state.next_id(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            role_code: role_code.to_string(),
            created_at: Utc::now(),
        };
        state.assignments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_assignment(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_code: &str,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.assignments.len();
        state.assignments.retain(|_, a| {
            !(a.user_id == user_id && a.tenant_id == tenant_id && a.role_code == role_code)
        });
        Ok(state.assignments.len() != before)
    }

    async fn assignments_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<UserTenantRole>> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .values()
            .filter(|a| a.user_id == user_id)
            .filter(|a| tenant_id.map_or(true, |t| a.tenant_id == t))
            .cloned()
            .collect())
    }

    async fn assignments_for_role(
        &self,
        role_code: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<UserTenantRole>> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .values()
            .filter(|a| a.role_code == role_code)
            .filter(|a| tenant_id.map_or(true, |t| a.tenant_id == t))
            .cloned()
            .collect())
    }

    async fn list_assignments(&self) -> Result<Vec<UserTenantRole>> {
        Ok(self.state.read().await.assignments.values().cloned().collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
