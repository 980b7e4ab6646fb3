//! Catalog service: validation and referential rules over a [`CatalogRepository`].

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::models::{
    Menu, MenuAction, MenuActionId, MenuActionUpdate, MenuId, MenuNode, MenuUpdate, NewMenu,
    NewMenuAction, NewRole, Role, RoleId, RoleUpdate, UserTenantRole,
};
use super::repository::CatalogRepository;
use super::tree::build_menu_tree;
use crate::error::{DepotError, Result};
use crate::rbac::ADMIN_ROLE;

/// The single writer of catalog records.
#[derive(Clone)]
pub struct PermissionCatalog {
    repo: Arc<dyn CatalogRepository>,
}

impl std::fmt::Debug for PermissionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCatalog").finish_non_exhaustive()
    }
}

impl PermissionCatalog {
    pub fn new(repo: Arc<dyn CatalogRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn CatalogRepository> {
        &self.repo
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Roles
    // ═══════════════════════════════════════════════════════════════════════

    #[instrument(skip(self, input), fields(code = %input.code, tenant = ?input.tenant_id))]
    pub async fn create_role(&self, input: NewRole) -> Result<Role> {
        input.validate()?;

        let same_code = self.repo.roles_with_code(&input.code).await?;
        match input.tenant_id.as_deref() {
            Some(tenant) => {
                if input.code == ADMIN_ROLE {
                    return Err(DepotError::duplicate("role", "code", &input.code)
                        .with_context("reason", "code is reserved for the administrator role"));
                }
                if same_code.iter().any(|r| r.tenant_id.is_none()) {
                    return Err(DepotError::duplicate("role", "code", &input.code)
                        .with_context("reason", "code is reserved by a system role"));
                }
                if same_code.iter().any(|r| r.tenant_id.as_deref() == Some(tenant)) {
                    return Err(DepotError::duplicate("role", "code", &input.code));
                }
            }
            None => {
                if !same_code.is_empty() {
                    return Err(DepotError::duplicate("role", "code", &input.code));
                }
            }
        }

        let role = self.repo.insert_role(input).await?;
        info!(role_id = role.id, code = %role.code, "Role created");
        Ok(role)
    }

    pub async fn get_role(&self, id: RoleId) -> Result<Role> {
        self.repo
            .get_role(id)
            .await?
            .ok_or_else(|| DepotError::not_found("role", id))
    }

    /// Roles visible in `tenant`: its own roles plus every system role.
    /// `None` lists system roles only.
    pub async fn list_roles(&self, tenant: Option<&str>) -> Result<Vec<Role>> {
        let roles = self.repo.list_roles().await?;
        Ok(roles
            .into_iter()
            .filter(|r| r.tenant_id.is_none() || r.tenant_id.as_deref() == tenant)
            .collect())
    }

    pub async fn list_all_roles(&self) -> Result<Vec<Role>> {
        self.repo.list_roles().await
    }

    /// The role `code` resolves to inside `tenant`: the tenant's own role if
    /// present, otherwise the system role of that code.
    pub async fn resolve_role(&self, tenant: &str, code: &str) -> Result<Option<Role>> {
        if let Some(role) = self.repo.find_role(Some(tenant), code).await? {
            return Ok(Some(role));
        }
        self.repo.find_role(None, code).await
    }

    pub async fn find_system_role(&self, code: &str) -> Result<Option<Role>> {
        self.repo.find_role(None, code).await
    }

    pub async fn update_role(&self, id: RoleId, update: RoleUpdate) -> Result<Role> {
        let mut role = self.get_role(id).await?;
        if role.is_system {
            return Err(DepotError::system_protected("role", id));
        }
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(DepotError::missing_field("name"));
            }
            role.name = name;
        }
        if let Some(description) = update.description {
            role.description = description;
        }
        self.repo.update_role(&role).await
    }

    /// Flip `is_active`. Fact cleanup is the synchronizer's job.
    pub async fn set_role_active(&self, id: RoleId, active: bool) -> Result<Role> {
        let mut role = self.get_role(id).await?;
        if role.is_system {
            return Err(DepotError::system_protected("role", id));
        }
        if role.is_active == active {
            return Ok(role);
        }
        role.is_active = active;
        let role = self.repo.update_role(&role).await?;
        info!(role_id = id, active, "Role activation changed");
        Ok(role)
    }

    /// Delete a role. Rejected for system roles and while users hold it.
    pub async fn delete_role(&self, id: RoleId) -> Result<Role> {
        let role = self.deletable_role(id).await?;
        self.repo.delete_role(id).await?;
        info!(role_id = id, code = %role.code, "Role deleted");
        Ok(role)
    }

    /// The role `id`, if [`delete_role`](Self::delete_role) would accept it.
    pub async fn deletable_role(&self, id: RoleId) -> Result<Role> {
        let role = self.get_role(id).await?;
        if role.is_system {
            return Err(DepotError::system_protected("role", id));
        }
        let assigned = self.count_assignments_for_role(&role).await?;
        if assigned > 0 {
            return Err(DepotError::referential(
                "role",
                id,
                format!("role '{}' is still assigned to {} user(s)", role.code, assigned),
            )
            .with_context("assignments", assigned));
        }
        Ok(role)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Menus
    // ═══════════════════════════════════════════════════════════════════════

    #[instrument(skip(self, input), fields(name = %input.name, path = %input.path))]
    pub async fn create_menu(&self, input: NewMenu) -> Result<Menu> {
        input.validate()?;
        if let Some(parent_id) = input.parent_id {
            let parent = self.get_menu(parent_id).await?;
            if parent.tenant_id != input.tenant_id {
                return Err(DepotError::referential(
                    "menu",
                    parent_id,
                    "parent menu belongs to a different tenant",
                ));
            }
        }
        let menu = self.repo.insert_menu(input).await?;
        debug!(menu_id = menu.id, "Menu created");
        Ok(menu)
    }

    pub async fn get_menu(&self, id: MenuId) -> Result<Menu> {
        self.repo
            .get_menu(id)
            .await?
            .ok_or_else(|| DepotError::not_found("menu", id))
    }

    /// Menus visible in `tenant`: global menus plus the tenant's own.
    pub async fn list_menus(&self, tenant: Option<&str>) -> Result<Vec<Menu>> {
        let menus = self.repo.list_menus().await?;
        Ok(menus
            .into_iter()
            .filter(|m| m.tenant_id.is_none() || m.tenant_id.as_deref() == tenant)
            .collect())
    }

    pub async fn update_menu(&self, id: MenuId, update: MenuUpdate) -> Result<Menu> {
        let mut menu = self.get_menu(id).await?;
        if menu.is_system {
            return Err(DepotError::system_protected("menu", id));
        }
        if let Some(name) = update.name {
            menu.name = name;
        }
        if let Some(path) = update.path {
            menu.path = path;
        }
        if let Some(sort) = update.sort {
            menu.sort = sort;
        }
        if let Some(visible) = update.visible {
            menu.visible = visible;
        }
        if let Some(parent_id) = update.parent_id {
            if let Some(parent_id) = parent_id {
                self.check_reparent(&menu, parent_id).await?;
            }
            menu.parent_id = parent_id;
        }
        if menu.name.trim().is_empty() {
            return Err(DepotError::missing_field("name"));
        }
        if menu.path.trim().is_empty() {
            return Err(DepotError::missing_field("path"));
        }
        self.repo.update_menu(&menu).await
    }

    async fn check_reparent(&self, menu: &Menu, parent_id: MenuId) -> Result<()> {
        let parent = self.get_menu(parent_id).await?;
        if parent.tenant_id != menu.tenant_id {
            return Err(DepotError::referential(
                "menu",
                parent_id,
                "parent menu belongs to a different tenant",
            ));
        }

        // Walk up from the new parent; meeting the menu itself means a cycle.
        let menus = self.repo.list_menus().await?;
        let mut cursor = Some(parent_id);
        let mut seen = BTreeSet::new();
        while let Some(id) = cursor {
            if id == menu.id {
                return Err(DepotError::referential(
                    "menu",
                    parent_id,
                    "a menu cannot be moved under itself or its descendants",
                ));
            }
            if !seen.insert(id) {
                break;
            }
            cursor = menus.iter().find(|m| m.id == id).and_then(|m| m.parent_id);
        }
        Ok(())
    }

    /// Delete a menu, its actions and its role links.
    pub async fn delete_menu(&self, id: MenuId) -> Result<Menu> {
        let menu = self.get_menu(id).await?;
        if menu.is_system {
            return Err(DepotError::system_protected("menu", id));
        }
        let children = self.repo.child_count(id).await?;
        if children > 0 {
            return Err(DepotError::referential(
                "menu",
                id,
                format!("menu '{}' still has {} child menu(s)", menu.name, children),
            ));
        }
        self.repo.delete_menu(id).await?;
        info!(menu_id = id, "Menu deleted");
        Ok(menu)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Menu actions
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_menu_action(&self, input: NewMenuAction) -> Result<MenuAction> {
        input.validate()?;
        self.get_menu(input.menu_id).await?;
        if self
            .repo
            .find_action_by_key(&input.permission_key)
            .await?
            .is_some()
        {
            return Err(DepotError::duplicate(
                "menu action",
                "permission_key",
                &input.permission_key,
            ));
        }
        let action = self.repo.insert_action(input).await?;
        debug!(action_id = action.id, key = %action.permission_key, "Menu action created");
        Ok(action)
    }

    pub async fn get_menu_action(&self, id: MenuActionId) -> Result<MenuAction> {
        self.repo
            .get_action(id)
            .await?
            .ok_or_else(|| DepotError::not_found("menu action", id))
    }

    pub async fn get_menu_action_by_key(&self, permission_key: &str) -> Result<Option<MenuAction>> {
        self.repo.find_action_by_key(permission_key).await
    }

    pub async fn list_menu_actions(&self, menu_id: MenuId) -> Result<Vec<MenuAction>> {
        self.repo.list_actions(Some(menu_id)).await
    }

    pub async fn list_all_menu_actions(&self) -> Result<Vec<MenuAction>> {
        self.repo.list_actions(None).await
    }

    pub async fn update_menu_action(
        &self,
        id: MenuActionId,
        update: MenuActionUpdate,
    ) -> Result<MenuAction> {
        let mut action = self.get_menu_action(id).await?;
        if action.is_system {
            return Err(DepotError::system_protected("menu action", id));
        }
        if let Some(code) = update.code {
            action.code = code;
        }
        if let Some(resource) = update.resource {
            action.resource = resource;
        }
        if let Some(method) = update.method {
            action.method = method;
        }
        if let Some(key) = update.permission_key {
            action.permission_key = key;
        }
        NewMenuAction {
            menu_id: action.menu_id,
            code: action.code.clone(),
            resource: action.resource.clone(),
            method: action.method,
            permission_key: action.permission_key.clone(),
            is_system: action.is_system,
        }
        .validate()?;
        self.repo.update_action(&action).await
    }

    pub async fn delete_menu_action(&self, id: MenuActionId) -> Result<MenuAction> {
        let action = self.get_menu_action(id).await?;
        if action.is_system {
            return Err(DepotError::system_protected("menu action", id));
        }
        self.repo.delete_action(id).await?;
        Ok(action)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Role ↔ menu links
    // ═══════════════════════════════════════════════════════════════════════

    /// Link menus to a role. Existing links are left alone.
    ///
    /// A tenant role may receive global menus and its own tenant's menus; a
    /// system role only global ones.
    pub async fn assign_menus_to_role(&self, role_id: RoleId, menu_ids: &[MenuId]) -> Result<usize> {
        let role = self.get_role(role_id).await?;
        for menu_id in menu_ids {
            let menu = self.get_menu(*menu_id).await?;
            if menu.tenant_id.is_some() && menu.tenant_id != role.tenant_id {
                return Err(DepotError::referential(
                    "menu",
                    menu_id,
                    format!("menu '{}' belongs to a different tenant than role '{}'", menu.name, role.code),
                ));
            }
        }
        let linked = self.repo.link_menus(role_id, menu_ids).await?;
        debug!(role_id, linked, "Menus assigned to role");
        Ok(linked)
    }

    pub async fn remove_menus_from_role(&self, role_id: RoleId, menu_ids: &[MenuId]) -> Result<usize> {
        self.get_role(role_id).await?;
        self.repo.unlink_menus(role_id, menu_ids).await
    }

    pub async fn role_menus(&self, role_id: RoleId) -> Result<Vec<Menu>> {
        let ids: BTreeSet<MenuId> = self.repo.role_menu_ids(role_id).await?.into_iter().collect();
        let menus = self.repo.list_menus().await?;
        Ok(menus.into_iter().filter(|m| ids.contains(&m.id)).collect())
    }

    /// Every `(resource, code)` pair reachable through the role's menus.
    pub async fn role_action_pairs(&self, role_id: RoleId) -> Result<Vec<(String, String)>> {
        let ids: BTreeSet<MenuId> = self.repo.role_menu_ids(role_id).await?.into_iter().collect();
        let actions = self.repo.list_actions(None).await?;
        let pairs: BTreeSet<(String, String)> = actions
            .into_iter()
            .filter(|a| ids.contains(&a.menu_id))
            .map(|a| (a.resource, a.code))
            .collect();
        Ok(pairs.into_iter().collect())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Assignments
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_assignment(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_code: &str,
    ) -> Result<UserTenantRole> {
        if user_id.is_empty() {
            return Err(DepotError::missing_field("user_id"));
        }
        self.repo.insert_assignment(user_id, tenant_id, role_code).await
    }

    pub async fn delete_assignment(&self, user_id: &str, tenant_id: &str, role_code: &str) -> Result<bool> {
        self.repo.delete_assignment(user_id, tenant_id, role_code).await
    }

    pub async fn list_assignments(&self, user_id: &str, tenant_id: &str) -> Result<Vec<UserTenantRole>> {
        self.repo.assignments_for_user(user_id, Some(tenant_id)).await
    }

    pub async fn list_all_assignments(&self) -> Result<Vec<UserTenantRole>> {
        self.repo.list_assignments().await
    }

    /// Assignments that refer to `role`: for a tenant role, those in its
    /// tenant; for a system role, those in any tenant.
    pub async fn list_role_assignments(&self, role: &Role) -> Result<Vec<UserTenantRole>> {
        self.repo
            .assignments_for_role(&role.code, role.tenant_id.as_deref())
            .await
    }

    pub async fn count_assignments_for_role(&self, role: &Role) -> Result<usize> {
        Ok(self.list_role_assignments(role).await?.len())
    }

    /// Active roles `user_id` holds in `tenant_id`.
    pub async fn active_roles_for_user(&self, user_id: &str, tenant_id: &str) -> Result<Vec<Role>> {
        let assignments = self.repo.assignments_for_user(user_id, Some(tenant_id)).await?;
        let mut roles = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            match self.resolve_role(tenant_id, &assignment.role_code).await? {
                Some(role) if role.is_active => roles.push(role),
                _ => {}
            }
        }
        Ok(roles)
    }

    /// Ids of every menu reachable through the user's active roles in the tenant.
    pub async fn user_menu_ids(&self, user_id: &str, tenant_id: &str) -> Result<BTreeSet<MenuId>> {
        let mut ids = BTreeSet::new();
        for role in self.active_roles_for_user(user_id, tenant_id).await? {
            ids.extend(self.repo.role_menu_ids(role.id).await?);
        }
        Ok(ids)
    }

    /// The visible menus the user reaches in the tenant, as a pruned tree.
    pub async fn get_user_menu_tree(&self, user_id: &str, tenant_id: &str) -> Result<Vec<MenuNode>> {
        let ids = self.user_menu_ids(user_id, tenant_id).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let menus: Vec<Menu> = self
            .repo
            .list_menus()
            .await?
            .into_iter()
            .filter(|m| m.visible && ids.contains(&m.id))
            .collect();
        Ok(build_menu_tree(menus))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
