//! Synchronizer: projects catalog state into the policy store.
//!
//! Writes always flow catalog first, facts second. When the fact write fails
//! after the catalog write succeeded, the catalog change is compensated so
//! the two never disagree about assignments.
//!
//! Incremental sync is additive. Grants for menus removed from a role stay in
//! the store until [`Synchronizer::rebuild`] recomputes everything.
//!
//! Assignment, lifecycle, bootstrap and rebuild operations read the catalog
//! and then write both sides. They run one at a time under a shared lock so
//! a deactivation sweep or a delete cannot interleave with an assignment.

use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::catalog::{NewRole, PermissionCatalog, Role, RoleId, UserTenantRole};
use crate::error::{DepotError, ErrorCode, Result};
use crate::rbac::roles::vocabulary_pairs;
use crate::rbac::{
    DefaultTenantRole, FactChange, FactSnapshot, GrantFact, GroupingFact, PolicyStore, ADMIN_ROLE,
    SYSTEM_DOMAIN, WILDCARD_DOMAIN,
};
use crate::telemetry::metrics::{REBUILD_DURATION_SECONDS, SYNC_FACTS_TOTAL};

/// Counts of facts touched by a sync operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub grants: usize,
    pub groupings: usize,
}

/// Result of a batch assignment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssignmentReport {
    /// Users newly assigned.
    pub assigned: Vec<String>,
    /// Users who already held the role.
    pub unchanged: Vec<String>,
}

/// Keeps the policy store in step with the catalog.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    catalog: PermissionCatalog,
    store: PolicyStore,
    lifecycle: Arc<Mutex<()>>,
}

impl Synchronizer {
    pub fn new(catalog: PermissionCatalog, store: PolicyStore) -> Self {
        Self {
            catalog,
            store,
            lifecycle: Arc::new(Mutex::new(())),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Role grants
    // ═══════════════════════════════════════════════════════════════════════

    /// Add a grant for every action of every menu assigned to the role.
    #[instrument(skip(self, role), fields(role = %role.code, domain = role.domain()))]
    pub async fn sync_role_permissions(&self, role: &Role) -> Result<usize> {
        let grants = self.catalog_grants(role).await?;
        let added = self.store.add_grants(grants).await?;
        counter!(SYNC_FACTS_TOTAL, "operation" => "sync_role").increment(added as u64);
        info!(added, "Role permissions synchronized");
        Ok(added)
    }

    async fn catalog_grants(&self, role: &Role) -> Result<Vec<GrantFact>> {
        Ok(self
            .catalog
            .role_action_pairs(role.id)
            .await?
            .into_iter()
            .map(|(object, action)| GrantFact::new(&role.code, role.domain(), object, action))
            .collect())
    }

    /// Assign menus to a role and sync the resulting grants.
    pub async fn assign_menus_to_role(&self, role_id: RoleId, menu_ids: &[i64]) -> Result<usize> {
        let linked = self.catalog.assign_menus_to_role(role_id, menu_ids).await?;
        let role = self.catalog.get_role(role_id).await?;
        self.sync_role_permissions(&role).await?;
        Ok(linked)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Assignments
    // ═══════════════════════════════════════════════════════════════════════

    /// Resolve `role_code` in `tenant` and check it may be held there.
    async fn assignable_role(&self, role_code: &str, tenant: &str) -> Result<Role> {
        let role = self
            .catalog
            .resolve_role(tenant, role_code)
            .await?
            .ok_or_else(|| DepotError::not_found("role", role_code).with_context("tenant", tenant))?;

        if !role.is_active {
            return Err(DepotError::new(
                ErrorCode::RoleInactive,
                format!("role '{}' is inactive", role.code),
            ));
        }

        let allowed = match role.tenant_id.as_deref() {
            Some(owner) => owner == tenant,
            None if tenant == WILDCARD_DOMAIN => role.code == ADMIN_ROLE,
            None => tenant == SYSTEM_DOMAIN,
        };
        if !allowed {
            return Err(DepotError::referential(
                "role",
                &role.code,
                format!("role '{}' cannot be held in tenant '{}'", role.code, tenant),
            ));
        }
        Ok(role)
    }

    /// Record the assignment in the catalog, then add the grouping fact.
    /// The assignment row is removed again if the grouping write fails.
    #[instrument(skip(self))]
    pub async fn assign_role_to_user(
        &self,
        user: &str,
        role_code: &str,
        tenant: &str,
    ) -> Result<UserTenantRole> {
        let _guard = self.lifecycle.lock().await;
        let role = self.assignable_role(role_code, tenant).await?;
        self.assign(user, &role, tenant).await
    }

    async fn assign(&self, user: &str, role: &Role, tenant: &str) -> Result<UserTenantRole> {
        let assignment = self.catalog.create_assignment(user, tenant, &role.code).await?;

        let grouping = GroupingFact::new(user, &role.code, tenant);
        if let Err(err) = self.store.add_grouping(grouping).await {
            if let Err(undo) = self.catalog.delete_assignment(user, tenant, &role.code).await {
                error!(
                    user,
                    tenant,
                    role = %role.code,
                    error = %undo,
                    "Failed to compensate assignment after grouping write failure"
                );
            }
            return Err(err);
        }

        counter!(SYNC_FACTS_TOTAL, "operation" => "assign").increment(1);
        info!(user, tenant, role = %role.code, "Role assigned");
        Ok(assignment)
    }

    /// Assign a role to several users. Users already holding the role are
    /// reported as unchanged. The role is checked once before any write.
    pub async fn assign_role_to_users(
        &self,
        role_code: &str,
        tenant: &str,
        users: &[String],
    ) -> Result<AssignmentReport> {
        let _guard = self.lifecycle.lock().await;
        let role = self.assignable_role(role_code, tenant).await?;
        if let Some(empty) = users.iter().position(|u| u.is_empty()) {
            return Err(DepotError::missing_field("user_id").with_context("index", empty));
        }

        let existing: BTreeSet<String> = self
            .catalog
            .list_role_assignments(&role)
            .await?
            .into_iter()
            .filter(|a| a.tenant_id == tenant)
            .map(|a| a.user_id)
            .collect();

        let mut report = AssignmentReport::default();
        for user in users {
            if existing.contains(user) || report.assigned.contains(user) {
                report.unchanged.push(user.clone());
                continue;
            }
            self.assign(user, &role, tenant).await?;
            report.assigned.push(user.clone());
        }
        Ok(report)
    }

    /// Remove a role from several users. Returns how many held it.
    /// A user's assignment row is restored if the grouping removal fails.
    pub async fn remove_role_from_users(
        &self,
        role_code: &str,
        tenant: &str,
        users: &[String],
    ) -> Result<usize> {
        if role_code.is_empty() {
            return Err(DepotError::missing_field("role_code"));
        }
        if tenant.is_empty() {
            return Err(DepotError::missing_field("tenant"));
        }
        if let Some(empty) = users.iter().position(|u| u.is_empty()) {
            return Err(DepotError::missing_field("user_id").with_context("index", empty));
        }

        let _guard = self.lifecycle.lock().await;
        let mut removed = 0;
        for user in users {
            if !self.catalog.delete_assignment(user, tenant, role_code).await? {
                continue;
            }
            let grouping = GroupingFact::new(user.as_str(), role_code, tenant);
            if let Err(err) = self.store.remove_grouping(grouping).await {
                if let Err(undo) = self.catalog.create_assignment(user, tenant, role_code).await {
                    error!(
                        user = %user,
                        tenant,
                        role = role_code,
                        error = %undo,
                        "Failed to restore assignment after grouping removal failure"
                    );
                }
                return Err(err);
            }
            removed += 1;
        }
        counter!(SYNC_FACTS_TOTAL, "operation" => "unassign").increment(removed as u64);
        info!(tenant, role = role_code, removed, "Role removed from users");
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bootstrap
    // ═══════════════════════════════════════════════════════════════════════

    async fn ensure_admin_role(&self) -> Result<Role> {
        if let Some(role) = self.catalog.find_system_role(ADMIN_ROLE).await? {
            return Ok(role);
        }
        self.catalog
            .create_role(
                NewRole::system(ADMIN_ROLE, "Administrator")
                    .with_description("Cross-tenant administrator"),
            )
            .await
    }

    async fn admin_grants(&self) -> Result<Vec<GrantFact>> {
        let mut pairs: BTreeSet<(String, String)> = vocabulary_pairs()
            .into_iter()
            .map(|(o, a)| (o.to_string(), a.to_string()))
            .collect();
        for action in self.catalog.list_all_menu_actions().await? {
            pairs.insert((action.resource, action.code));
        }
        Ok(pairs
            .into_iter()
            .map(|(object, action)| GrantFact::new(ADMIN_ROLE, WILDCARD_DOMAIN, object, action))
            .collect())
    }

    /// Grant the administrator role every known `(object, action)` pair in
    /// the wildcard domain. Safe to run repeatedly.
    #[instrument(skip(self))]
    pub async fn initialize_system_admin_permissions(&self) -> Result<usize> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_admin_role().await?;
        let grants = self.admin_grants().await?;
        let total = grants.len();
        let added = self.store.add_grants(grants).await?;
        counter!(SYNC_FACTS_TOTAL, "operation" => "seed_admin").increment(added as u64);
        info!(added, total, "System administrator permissions initialized");
        Ok(added)
    }

    async fn ensure_default_role(&self, tenant: &str, default: DefaultTenantRole) -> Result<Role> {
        if let Some(role) = self.catalog.repository().find_role(Some(tenant), default.code()).await? {
            return Ok(role);
        }
        let mut input = NewRole::tenant(tenant, default.code(), default.name())
            .with_description(default.description());
        input.is_system = true;
        self.catalog.create_role(input).await
    }

    /// Create the default roles of `tenant` and grant their permissions
    /// inside the tenant's own domain.
    #[instrument(skip(self))]
    pub async fn initialize_role_permissions_for_tenant(&self, tenant: &str) -> Result<usize> {
        if tenant.is_empty() {
            return Err(DepotError::missing_field("tenant"));
        }
        if tenant == WILDCARD_DOMAIN {
            return Err(DepotError::validation(
                "default tenant roles cannot be initialized in the wildcard domain",
            ));
        }

        let _guard = self.lifecycle.lock().await;
        let mut grants = Vec::new();
        for default in DefaultTenantRole::all() {
            let role = self.ensure_default_role(tenant, default).await?;
            grants.extend(default.grants(tenant));
            grants.extend(self.catalog_grants(&role).await?);
        }
        let added = self.store.add_grants(grants).await?;
        counter!(SYNC_FACTS_TOTAL, "operation" => "seed_tenant").increment(added as u64);
        info!(added, "Tenant role permissions initialized");
        Ok(added)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Activate or deactivate a role.
    ///
    /// Deactivation removes every grouping onto the role in its tenant, so
    /// holders lose its grants at once; the grants themselves are kept.
    /// Activation re-syncs the role's grants, then re-creates the groupings
    /// from the catalog assignments in a single write.
    #[instrument(skip(self))]
    pub async fn set_role_active(&self, role_id: RoleId, active: bool) -> Result<Role> {
        let _guard = self.lifecycle.lock().await;
        let before = self.catalog.get_role(role_id).await?;
        let role = self.catalog.set_role_active(role_id, active).await?;
        if before.is_active == active {
            return Ok(role);
        }

        let applied = if active {
            self.materialize_groupings(&role).await
        } else {
            self.store
                .remove_filtered_groupings(&role.code, Some(role.domain()))
                .await
        };

        match applied {
            Ok(count) => {
                info!(role = %role.code, active, groupings = count, "Role groupings updated");
                Ok(role)
            }
            Err(err) => {
                if let Err(undo) = self.catalog.set_role_active(role_id, before.is_active).await {
                    error!(role_id, error = %undo, "Failed to restore role activation flag");
                }
                Err(err)
            }
        }
    }

    /// Inactive roles keep their grants, so syncing them first is harmless
    /// if the grouping write then fails.
    async fn materialize_groupings(&self, role: &Role) -> Result<usize> {
        self.sync_role_permissions(role).await?;
        let groupings = self
            .catalog
            .list_role_assignments(role)
            .await?
            .into_iter()
            .map(|a| GroupingFact::new(a.user_id, &role.code, a.tenant_id))
            .collect();
        self.store.add_groupings(groupings).await
    }

    /// Delete a role and drop its facts.
    ///
    /// The facts go first, in one write. If the catalog delete then fails
    /// they are restored, so a later role reusing the code starts clean.
    #[instrument(skip(self))]
    pub async fn delete_role(&self, role_id: RoleId) -> Result<Role> {
        let _guard = self.lifecycle.lock().await;
        let role = self.catalog.deletable_role(role_id).await?;
        let removed = self.store.remove_role_facts(&role.code, role.domain()).await?;

        if let Err(err) = self.catalog.delete_role(role_id).await {
            if let Err(undo) = self.store.revert(&removed).await {
                error!(
                    role = %role.code,
                    facts = removed.len(),
                    error = %undo,
                    "Failed to restore role facts after catalog delete failure"
                );
            }
            return Err(err);
        }

        let groupings = removed
            .iter()
            .filter(|c| matches!(c, FactChange::RemoveGrouping(_)))
            .count();
        if groupings > 0 {
            warn!(role = %role.code, groupings, "Removed groupings left behind by a deleted role");
        }
        info!(role = %role.code, facts = removed.len(), "Role facts removed");
        Ok(role)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Rebuild
    // ═══════════════════════════════════════════════════════════════════════

    /// Compute the full fact set the catalog implies.
    pub async fn project(&self) -> Result<FactSnapshot> {
        let mut grants = BTreeSet::new();
        let mut groupings = BTreeSet::new();

        if self.catalog.find_system_role(ADMIN_ROLE).await?.is_some() {
            grants.extend(self.admin_grants().await?);
        }

        for role in self.catalog.list_all_roles().await? {
            if !role.is_active {
                continue;
            }
            if let (Some(tenant), Some(default)) =
                (role.tenant_id.as_deref(), DefaultTenantRole::from_code(&role.code))
            {
                if role.is_system {
                    grants.extend(default.grants(tenant));
                }
            }
            grants.extend(self.catalog_grants(&role).await?);
        }

        for assignment in self.catalog.list_all_assignments().await? {
            match self
                .catalog
                .resolve_role(&assignment.tenant_id, &assignment.role_code)
                .await?
            {
                Some(role) if role.is_active => {
                    groupings.insert(GroupingFact::new(
                        assignment.user_id,
                        role.code,
                        assignment.tenant_id,
                    ));
                }
                Some(_) => {}
                None => warn!(
                    user = %assignment.user_id,
                    tenant = %assignment.tenant_id,
                    role = %assignment.role_code,
                    "Assignment refers to an unknown role, skipped"
                ),
            }
        }

        Ok(FactSnapshot {
            grants: grants.into_iter().collect(),
            groupings: groupings.into_iter().collect(),
        })
    }

    /// Replace every fact with the projection of the current catalog.
    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<SyncReport> {
        let _guard = self.lifecycle.lock().await;
        let started = Instant::now();
        let snapshot = self.project().await?;
        let report = SyncReport {
            grants: snapshot.grants.len(),
            groupings: snapshot.groupings.len(),
        };
        self.store.replace_all(snapshot).await?;
        histogram!(REBUILD_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        info!(
            grants = report.grants,
            groupings = report.groupings,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Policy facts rebuilt from catalog"
        );
        Ok(report)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
