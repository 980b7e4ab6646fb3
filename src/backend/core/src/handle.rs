//! The process-wide authorization handle.
//!
//! [`AuthzCore`] wires the policy store, engine, catalog, synchronizer and
//! resolver together. Construct it once with [`AuthzCore::init_global`] at
//! startup and pass the returned handle to consumers; tests build isolated
//! instances with [`AuthzCore::new`] or [`AuthzCore::in_memory`].

use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::catalog::{
    CatalogRepository, InMemoryCatalog, Menu, MenuAction, MenuActionId, MenuActionUpdate, MenuId,
    MenuNode, MenuUpdate, NewMenu, NewMenuAction, NewRole, PermissionCatalog, Role, RoleId,
    RoleUpdate, UserTenantRole,
};
use crate::config::{BootstrapConfig, CatalogBackend, Config, PolicyBackend};
use crate::db::Database;
use crate::error::{DepotError, ErrorCode, Result};
use crate::rbac::{
    Enforcer, FileAdapter, GrantFact, GroupingFact, MemoryAdapter, PackageAction, PolicyAdapter,
    PolicyStore, ProjectAction, SidebarItem, ADMIN_ROLE, WILDCARD_DOMAIN,
};
use crate::resolve::PermissionResolver;
use crate::sync::{AssignmentReport, SyncReport, Synchronizer};

static GLOBAL: OnceCell<AuthzCore> = OnceCell::const_new();

/// Handle to the authorization core. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuthzCore {
    store: PolicyStore,
    enforcer: Enforcer,
    catalog: PermissionCatalog,
    sync: Synchronizer,
    resolver: PermissionResolver,
    database: Option<Database>,
}

impl AuthzCore {
    // ═══════════════════════════════════════════════════════════════════════
    // Construction
    // ═══════════════════════════════════════════════════════════════════════

    /// Build a core over the given catalog repository and policy adapter.
    /// Persisted facts are loaded before this returns.
    pub async fn new(
        catalog: Arc<dyn CatalogRepository>,
        adapter: Arc<dyn PolicyAdapter>,
    ) -> Result<Self> {
        let store = PolicyStore::open(adapter).await?;
        let enforcer = Enforcer::new(store.clone());
        let catalog = PermissionCatalog::new(catalog);
        Ok(Self {
            sync: Synchronizer::new(catalog.clone(), store.clone()),
            resolver: PermissionResolver::new(catalog.clone(), enforcer.clone()),
            store,
            enforcer,
            catalog,
            database: None,
        })
    }

    /// A core with every store in memory.
    pub async fn in_memory() -> Result<Self> {
        Self::new(Arc::new(InMemoryCatalog::new()), Arc::new(MemoryAdapter::new())).await
    }

    /// A core with an in-memory catalog and facts persisted to `path`.
    pub async fn with_policy_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(
            Arc::new(InMemoryCatalog::new()),
            Arc::new(FileAdapter::new(path.as_ref())),
        )
        .await
    }

    /// Build a core from configuration, connecting to the database when a
    /// backend needs it, and run the configured bootstrap.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let database = match (&config.database, config.needs_database()) {
            (Some(db_config), true) => {
                let database = Database::connect(db_config).await?;
                if db_config.run_migrations {
                    database.migrate().await?;
                }
                Some(database)
            }
            _ => None,
        };
        let require_db = || {
            database.clone().ok_or_else(|| {
                DepotError::new(ErrorCode::InvalidConfiguration, "database is not configured")
            })
        };

        let catalog: Arc<dyn CatalogRepository> = match config.catalog.backend {
            CatalogBackend::Memory => Arc::new(InMemoryCatalog::new()),
            CatalogBackend::Postgres => Arc::new(require_db()?.catalog()),
        };
        let adapter: Arc<dyn PolicyAdapter> = match config.policy.backend {
            PolicyBackend::Memory => Arc::new(MemoryAdapter::new()),
            PolicyBackend::File => Arc::new(FileAdapter::new(&config.policy.path)),
            PolicyBackend::Postgres => Arc::new(require_db()?.policy_adapter()),
        };

        let mut core = Self::new(catalog, adapter).await?;
        core.database = database;
        core.bootstrap(&config.bootstrap).await?;
        info!(
            policy_backend = core.store.backend_name(),
            grants = core.store.grant_count().await,
            "Authorization core ready"
        );
        Ok(core)
    }

    /// Initialize the process-wide instance. Later calls return the first
    /// instance and ignore `config`.
    pub async fn init_global(config: &Config) -> Result<&'static AuthzCore> {
        GLOBAL.get_or_try_init(|| Self::from_config(config)).await
    }

    /// The process-wide instance, if initialized.
    pub fn global() -> Option<&'static AuthzCore> {
        GLOBAL.get()
    }

    /// Seed administrator grants, tenant defaults and administrators.
    pub async fn bootstrap(&self, bootstrap: &BootstrapConfig) -> Result<()> {
        if bootstrap.seed_admin || !bootstrap.admin_users.is_empty() {
            self.initialize_system_admin_permissions().await?;
        }
        for tenant in &bootstrap.tenants {
            self.initialize_role_permissions_for_tenant(tenant).await?;
        }
        if !bootstrap.admin_users.is_empty() {
            self.assign_role_to_users(ADMIN_ROLE, WILDCARD_DOMAIN, &bootstrap.admin_users)
                .await?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Components
    // ═══════════════════════════════════════════════════════════════════════

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn enforcer(&self) -> &Enforcer {
        &self.enforcer
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Enforcement and facts
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn enforce(&self, subject: &str, domain: &str, object: &str, action: &str) -> Result<bool> {
        self.enforcer.enforce(subject, domain, object, action).await
    }

    pub async fn add_grant(&self, subject: &str, domain: &str, object: &str, action: &str) -> Result<bool> {
        self.store.add_grant(GrantFact::new(subject, domain, object, action)).await
    }

    pub async fn remove_grant(&self, subject: &str, domain: &str, object: &str, action: &str) -> Result<bool> {
        self.store.remove_grant(GrantFact::new(subject, domain, object, action)).await
    }

    pub async fn add_grouping(&self, user: &str, role: &str, domain: &str) -> Result<bool> {
        self.store.add_grouping(GroupingFact::new(user, role, domain)).await
    }

    pub async fn remove_grouping(&self, user: &str, role: &str, domain: &str) -> Result<bool> {
        self.store.remove_grouping(GroupingFact::new(user, role, domain)).await
    }

    pub async fn roles_of(&self, user: &str, domain: &str) -> Vec<String> {
        self.enforcer.roles_of(user, domain).await
    }

    pub async fn users_of(&self, role: &str, domain: &str) -> Vec<String> {
        self.enforcer.users_of(role, domain).await
    }

    pub async fn effective_permissions(&self, user: &str, domain: &str) -> Result<Vec<GrantFact>> {
        self.resolver.effective_permissions(user, domain).await
    }

    pub async fn effective_permission_keys(&self, user: &str, domain: &str) -> Result<Vec<String>> {
        self.resolver.effective_permission_keys(user, domain).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn check_action_permission(&self, user: &str, tenant: &str, permission_key: &str) -> Result<bool> {
        self.resolver.check_action_permission(user, tenant, permission_key).await
    }

    pub async fn check_menu_permission(&self, user: &str, tenant: &str, menu_id: MenuId) -> Result<bool> {
        self.resolver.check_menu_permission(user, tenant, menu_id).await
    }

    pub async fn sidebar_permissions(&self, user: &str, tenant: &str) -> Result<Vec<SidebarItem>> {
        self.resolver.sidebar_permissions(user, tenant).await
    }

    pub async fn project_permissions(&self, user: &str, tenant: &str) -> Result<Vec<ProjectAction>> {
        self.resolver.project_permissions(user, tenant).await
    }

    pub async fn package_permissions(&self, user: &str, tenant: &str) -> Result<Vec<PackageAction>> {
        self.resolver.package_permissions(user, tenant).await
    }

    pub async fn user_menu_tree(&self, user: &str, tenant: &str) -> Result<Vec<MenuNode>> {
        self.resolver.user_menu_tree(user, tenant).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Catalog
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_role(&self, input: NewRole) -> Result<Role> {
        self.catalog.create_role(input).await
    }

    pub async fn get_role(&self, id: RoleId) -> Result<Role> {
        self.catalog.get_role(id).await
    }

    pub async fn list_roles(&self, tenant: Option<&str>) -> Result<Vec<Role>> {
        self.catalog.list_roles(tenant).await
    }

    pub async fn update_role(&self, id: RoleId, update: RoleUpdate) -> Result<Role> {
        self.catalog.update_role(id, update).await
    }

    /// Delete a role and the facts derived from it.
    pub async fn delete_role(&self, id: RoleId) -> Result<Role> {
        self.sync.delete_role(id).await
    }

    pub async fn set_role_active(&self, id: RoleId, active: bool) -> Result<Role> {
        self.sync.set_role_active(id, active).await
    }

    pub async fn create_menu(&self, input: NewMenu) -> Result<Menu> {
        self.catalog.create_menu(input).await
    }

    pub async fn get_menu(&self, id: MenuId) -> Result<Menu> {
        self.catalog.get_menu(id).await
    }

    pub async fn list_menus(&self, tenant: Option<&str>) -> Result<Vec<Menu>> {
        self.catalog.list_menus(tenant).await
    }

    pub async fn update_menu(&self, id: MenuId, update: MenuUpdate) -> Result<Menu> {
        self.catalog.update_menu(id, update).await
    }

    pub async fn delete_menu(&self, id: MenuId) -> Result<Menu> {
        self.catalog.delete_menu(id).await
    }

    pub async fn create_menu_action(&self, input: NewMenuAction) -> Result<MenuAction> {
        self.catalog.create_menu_action(input).await
    }

    pub async fn get_menu_action(&self, id: MenuActionId) -> Result<MenuAction> {
        self.catalog.get_menu_action(id).await
    }

    pub async fn list_menu_actions(&self, menu_id: MenuId) -> Result<Vec<MenuAction>> {
        self.catalog.list_menu_actions(menu_id).await
    }

    pub async fn update_menu_action(&self, id: MenuActionId, update: MenuActionUpdate) -> Result<MenuAction> {
        self.catalog.update_menu_action(id, update).await
    }

    pub async fn delete_menu_action(&self, id: MenuActionId) -> Result<MenuAction> {
        self.catalog.delete_menu_action(id).await
    }

    /// Link menus to a role and sync the grants they imply.
    pub async fn assign_menus_to_role(&self, role_id: RoleId, menu_ids: &[MenuId]) -> Result<usize> {
        self.sync.assign_menus_to_role(role_id, menu_ids).await
    }

    /// Unlink menus from a role. Grants already synced stay until a rebuild.
    pub async fn remove_menus_from_role(&self, role_id: RoleId, menu_ids: &[MenuId]) -> Result<usize> {
        self.catalog.remove_menus_from_role(role_id, menu_ids).await
    }

    pub async fn list_assignments(&self, user: &str, tenant: &str) -> Result<Vec<UserTenantRole>> {
        self.catalog.list_assignments(user, tenant).await
    }

    /// Holders of `role_code` in `tenant`.
    pub async fn list_role_assignments(&self, role_code: &str, tenant: &str) -> Result<Vec<UserTenantRole>> {
        self.catalog
            .repository()
            .assignments_for_role(role_code, Some(tenant))
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Synchronization
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn sync_role_permissions(&self, role: &Role) -> Result<usize> {
        self.sync.sync_role_permissions(role).await
    }

    pub async fn assign_role_to_user(&self, user: &str, role_code: &str, tenant: &str) -> Result<UserTenantRole> {
        self.sync.assign_role_to_user(user, role_code, tenant).await
    }

    pub async fn assign_role_to_users(
        &self,
        role_code: &str,
        tenant: &str,
        users: &[String],
    ) -> Result<AssignmentReport> {
        self.sync.assign_role_to_users(role_code, tenant, users).await
    }

    pub async fn remove_role_from_users(&self, role_code: &str, tenant: &str, users: &[String]) -> Result<usize> {
        self.sync.remove_role_from_users(role_code, tenant, users).await
    }

    pub async fn initialize_system_admin_permissions(&self) -> Result<usize> {
        self.sync.initialize_system_admin_permissions().await
    }

    pub async fn initialize_role_permissions_for_tenant(&self, tenant: &str) -> Result<usize> {
        self.sync.initialize_role_permissions_for_tenant(tenant).await
    }

    pub async fn rebuild(&self) -> Result<SyncReport> {
        self.sync.rebuild().await
    }
}
