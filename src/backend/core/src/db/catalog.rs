//! Catalog persistence in PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::catalog::models::{
    Menu, MenuAction, MenuActionId, MenuId, NewMenu, NewMenuAction, NewRole, Role, RoleId,
    UserTenantRole,
};
use crate::catalog::repository::CatalogRepository;
use crate::error::{DepotError, Result};

const ROLE_COLUMNS: &str =
    "id, code, name, description, tenant_id, is_system, is_active, created_at, updated_at";
const MENU_COLUMNS: &str =
    "id, name, path, sort, visible, is_system, tenant_id, parent_id, created_at, updated_at";
const ACTION_COLUMNS: &str =
    "id, menu_id, code, resource, method, permission_key, is_system, created_at";
const ASSIGNMENT_COLUMNS: &str = "id, user_id, tenant_id, role_code, created_at";

/// [`CatalogRepository`] backed by the `authz_*` catalog tables.
#[derive(Debug, Clone)]
pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types (for sqlx queries)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: i64,
    code: String,
    name: String,
    description: String,
    tenant_id: Option<String>,
    is_system: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: row.id,
            code: row.code,
            name: row.name,
            description: row.description,
            tenant_id: row.tenant_id,
            is_system: row.is_system,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MenuRow {
    id: i64,
    name: String,
    path: String,
    sort: i32,
    visible: bool,
    is_system: bool,
    tenant_id: Option<String>,
    parent_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MenuRow> for Menu {
    fn from(row: MenuRow) -> Self {
        Menu {
            id: row.id,
            name: row.name,
            path: row.path,
            sort: row.sort,
            visible: row.visible,
            is_system: row.is_system,
            tenant_id: row.tenant_id,
            parent_id: row.parent_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MenuActionRow {
    id: i64,
    menu_id: i64,
    code: String,
    resource: String,
    method: String,
    permission_key: String,
    is_system: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<MenuActionRow> for MenuAction {
    type Error = DepotError;

    fn try_from(row: MenuActionRow) -> Result<Self> {
        Ok(MenuAction {
            id: row.id,
            menu_id: row.menu_id,
            code: row.code,
            resource: row.resource,
            method: row.method.parse()?,
            permission_key: row.permission_key,
            is_system: row.is_system,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AssignmentRow {
    id: i64,
    user_id: String,
    tenant_id: String,
    role_code: String,
    created_at: DateTime<Utc>,
}

impl From<AssignmentRow> for UserTenantRole {
    fn from(row: AssignmentRow) -> Self {
        UserTenantRole {
            id: row.id,
            user_id: row.user_id,
            tenant_id: row.tenant_id,
            role_code: row.role_code,
            created_at: row.created_at,
        }
    }
}

fn actions(rows: Vec<MenuActionRow>) -> Result<Vec<MenuAction>> {
    rows.into_iter().map(MenuAction::try_from).collect()
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    // ═══════════════════════════════════════════════════════════════════════════
    // Role Operations
    // ═══════════════════════════════════════════════════════════════════════════

    async fn insert_role(&self, role: NewRole) -> Result<Role> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "INSERT INTO authz_roles (code, name, description, tenant_id, is_system) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            ROLE_COLUMNS
        ))
        .bind(&role.code)
        .bind(&role.name)
        .bind(&role.description)
        .bind(&role.tenant_id)
        .bind(role.is_system)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {} FROM authz_roles WHERE id = $1",
            ROLE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Role::from))
    }

    async fn find_role(&self, tenant_id: Option<&str>, code: &str) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {} FROM authz_roles \
             WHERE tenant_id IS NOT DISTINCT FROM $1 AND code = $2",
            ROLE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Role::from))
    }

    async fn roles_with_code(&self, code: &str) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {} FROM authz_roles WHERE code = $1 ORDER BY id",
            ROLE_COLUMNS
        ))
        .bind(code)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {} FROM authz_roles ORDER BY id",
            ROLE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn update_role(&self, role: &Role) -> Result<Role> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "UPDATE authz_roles \
             SET name = $2, description = $3, is_active = $4, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            ROLE_COLUMNS
        ))
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_active)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Role::from)
            .ok_or_else(|| DepotError::not_found("role", role.id))
    }

    async fn delete_role(&self, id: RoleId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM authz_roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Menu Operations
    // ═══════════════════════════════════════════════════════════════════════════

    async fn insert_menu(&self, menu: NewMenu) -> Result<Menu> {
        let row = sqlx::query_as::<_, MenuRow>(&format!(
            "INSERT INTO authz_menus (name, path, sort, visible, is_system, tenant_id, parent_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            MENU_COLUMNS
        ))
        .bind(&menu.name)
        .bind(&menu.path)
        .bind(menu.sort)
        .bind(menu.visible)
        .bind(menu.is_system)
        .bind(&menu.tenant_id)
        .bind(menu.parent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_menu(&self, id: MenuId) -> Result<Option<Menu>> {
        let row = sqlx::query_as::<_, MenuRow>(&format!(
            "SELECT {} FROM authz_menus WHERE id = $1",
            MENU_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Menu::from))
    }

    async fn list_menus(&self) -> Result<Vec<Menu>> {
        let rows = sqlx::query_as::<_, MenuRow>(&format!(
            "SELECT {} FROM authz_menus ORDER BY sort, id",
            MENU_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Menu::from).collect())
    }

    async fn child_count(&self, id: MenuId) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM authz_menus WHERE parent_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn update_menu(&self, menu: &Menu) -> Result<Menu> {
        let row = sqlx::query_as::<_, MenuRow>(&format!(
            "UPDATE authz_menus \
             SET name = $2, path = $3, sort = $4, visible = $5, parent_id = $6, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            MENU_COLUMNS
        ))
        .bind(menu.id)
        .bind(&menu.name)
        .bind(&menu.path)
        .bind(menu.sort)
        .bind(menu.visible)
        .bind(menu.parent_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Menu::from)
            .ok_or_else(|| DepotError::not_found("menu", menu.id))
    }

    async fn delete_menu(&self, id: MenuId) -> Result<bool> {
        // Actions and role links go with the menu through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM authz_menus WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Menu Action Operations
    // ═══════════════════════════════════════════════════════════════════════════

    async fn insert_action(&self, action: NewMenuAction) -> Result<MenuAction> {
        let row = sqlx::query_as::<_, MenuActionRow>(&format!(
            "INSERT INTO authz_menu_actions (menu_id, code, resource, method, permission_key, is_system) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            ACTION_COLUMNS
        ))
        .bind(action.menu_id)
        .bind(&action.code)
        .bind(&action.resource)
        .bind(action.method.as_str())
        .bind(&action.permission_key)
        .bind(action.is_system)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_action(&self, id: MenuActionId) -> Result<Option<MenuAction>> {
        let row = sqlx::query_as::<_, MenuActionRow>(&format!(
            "SELECT {} FROM authz_menu_actions WHERE id = $1",
            ACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(MenuAction::try_from).transpose()
    }

    async fn find_action_by_key(&self, permission_key: &str) -> Result<Option<MenuAction>> {
        let row = sqlx::query_as::<_, MenuActionRow>(&format!(
            "SELECT {} FROM authz_menu_actions WHERE permission_key = $1",
            ACTION_COLUMNS
        ))
        .bind(permission_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(MenuAction::try_from).transpose()
    }

    async fn list_actions(&self, menu_id: Option<MenuId>) -> Result<Vec<MenuAction>> {
        let rows = sqlx::query_as::<_, MenuActionRow>(&format!(
            "SELECT {} FROM authz_menu_actions \
             WHERE $1::BIGINT IS NULL OR menu_id = $1 ORDER BY id",
            ACTION_COLUMNS
        ))
        .bind(menu_id)
        .fetch_all(&self.pool)
        .await?;
        actions(rows)
    }

    async fn update_action(&self, action: &MenuAction) -> Result<MenuAction> {
        let row = sqlx::query_as::<_, MenuActionRow>(&format!(
            "UPDATE authz_menu_actions \
             SET code = $2, resource = $3, method = $4, permission_key = $5 \
             WHERE id = $1 RETURNING {}",
            ACTION_COLUMNS
        ))
        .bind(action.id)
        .bind(&action.code)
        .bind(&action.resource)
        .bind(action.method.as_str())
        .bind(&action.permission_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(MenuAction::try_from)
            .transpose()?
            .ok_or_else(|| DepotError::not_found("menu action", action.id))
    }

    async fn delete_action(&self, id: MenuActionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM authz_menu_actions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Role ↔ Menu Operations
    // ═══════════════════════════════════════════════════════════════════════════

    async fn link_menus(&self, role_id: RoleId, menu_ids: &[MenuId]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut linked = 0;
        for menu_id in menu_ids {
            let result = sqlx::query(
                "INSERT INTO authz_role_menus (role_id, menu_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(role_id)
            .bind(menu_id)
            .execute(&mut *tx)
            .await?;
            linked += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(linked)
    }

    async fn unlink_menus(&self, role_id: RoleId, menu_ids: &[MenuId]) -> Result<usize> {
        let result =
            sqlx::query("DELETE FROM authz_role_menus WHERE role_id = $1 AND menu_id = ANY($2)")
                .bind(role_id)
                .bind(menu_ids)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn role_menu_ids(&self, role_id: RoleId) -> Result<Vec<MenuId>> {
        let ids = sqlx::query_scalar(
            "SELECT menu_id FROM authz_role_menus WHERE role_id = $1 ORDER BY menu_id",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Assignment Operations
    // ═══════════════════════════════════════════════════════════════════════════

    async fn insert_assignment(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_code: &str,
    ) -> Result<UserTenantRole> {
        let row = sqlx::query_as::<_, AssignmentRow>(&format!(
            "INSERT INTO authz_user_tenant_roles (user_id, tenant_id, role_code) \
             VALUES ($1, $2, $3) RETURNING {}",
            ASSIGNMENT_COLUMNS
        ))
        .bind(user_id)
        .bind(tenant_id)
        .bind(role_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn delete_assignment(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_code: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM authz_user_tenant_roles \
             WHERE user_id = $1 AND tenant_id = $2 AND role_code = $3",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(role_code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn assignments_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<UserTenantRole>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {} FROM authz_user_tenant_roles \
             WHERE user_id = $1 AND ($2::TEXT IS NULL OR tenant_id = $2) ORDER BY id",
            ASSIGNMENT_COLUMNS
        ))
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserTenantRole::from).collect())
    }

    async fn assignments_for_role(
        &self,
        role_code: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<UserTenantRole>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {} FROM authz_user_tenant_roles \
             WHERE role_code = $1 AND ($2::TEXT IS NULL OR tenant_id = $2) ORDER BY id",
            ASSIGNMENT_COLUMNS
        ))
        .bind(role_code)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserTenantRole::from).collect())
    }

    async fn list_assignments(&self) -> Result<Vec<UserTenantRole>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {} FROM authz_user_tenant_roles ORDER BY id",
            ASSIGNMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserTenantRole::from).collect())
    }
}
