//! Fixed permission vocabularies and the default role set.
//!
//! Depot ships with one system role and three per-tenant defaults:
//!
//! | Role    | Domain  | Description                                            |
//! |---------|---------|--------------------------------------------------------|
//! | admin   | `*`     | Everything, in every tenant                            |
//! | owner   | tenant  | Every sidebar item, project and package action         |
//! | user    | tenant  | Day-to-day work: publish packages, manage projects     |
//! | viewer  | tenant  | Read-only access plus package downloads                |
//!
//! Vocabularies are small and closed; the resolution layer enumerates them
//! with one `enforce` per item.

use serde::{Deserialize, Serialize};

use super::models::GrantFact;

/// Role code of the cross-tenant administrator.
pub const ADMIN_ROLE: &str = "admin";

/// Object names used by the fixed vocabularies.
pub const SIDEBAR_OBJECT: &str = "sidebar";
pub const PROJECT_OBJECT: &str = "project";
pub const PACKAGE_OBJECT: &str = "package";

// ═══════════════════════════════════════════════════════════════════════════════
// Vocabularies
// ═══════════════════════════════════════════════════════════════════════════════

/// Navigation entries a tenant member may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidebarItem {
    Dashboard,
    Projects,
    Packages,
    Releases,
    Shares,
    Users,
    Roles,
    Menus,
    Settings,
}

impl SidebarItem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Projects => "projects",
            Self::Packages => "packages",
            Self::Releases => "releases",
            Self::Shares => "shares",
            Self::Users => "users",
            Self::Roles => "roles",
            Self::Menus => "menus",
            Self::Settings => "settings",
        }
    }

    pub fn all() -> &'static [SidebarItem] {
        &[
            Self::Dashboard,
            Self::Projects,
            Self::Packages,
            Self::Releases,
            Self::Shares,
            Self::Users,
            Self::Roles,
            Self::Menus,
            Self::Settings,
        ]
    }
}

/// Actions on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectAction {
    Read,
    Create,
    Update,
    Delete,
    ManageMembers,
}

impl ProjectAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::ManageMembers => "manage_members",
        }
    }

    pub fn all() -> &'static [ProjectAction] {
        &[
            Self::Read,
            Self::Create,
            Self::Update,
            Self::Delete,
            Self::ManageMembers,
        ]
    }
}

/// Actions on a package and its releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageAction {
    Read,
    Create,
    Update,
    Delete,
    Upload,
    Download,
    Publish,
}

impl PackageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Publish => "publish",
        }
    }

    pub fn all() -> &'static [PackageAction] {
        &[
            Self::Read,
            Self::Create,
            Self::Update,
            Self::Delete,
            Self::Upload,
            Self::Download,
            Self::Publish,
        ]
    }
}

/// Every `(object, action)` pair across the fixed vocabularies.
pub fn vocabulary_pairs() -> Vec<(&'static str, &'static str)> {
    let mut pairs = Vec::new();
    pairs.extend(SidebarItem::all().iter().map(|i| (SIDEBAR_OBJECT, i.as_str())));
    pairs.extend(ProjectAction::all().iter().map(|a| (PROJECT_OBJECT, a.as_str())));
    pairs.extend(PackageAction::all().iter().map(|a| (PACKAGE_OBJECT, a.as_str())));
    pairs
}

// ═══════════════════════════════════════════════════════════════════════════════
// Default tenant roles
// ═══════════════════════════════════════════════════════════════════════════════

/// Roles created in every tenant by the tenant bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultTenantRole {
    Owner,
    User,
    Viewer,
}

impl DefaultTenantRole {
    /// Get the role code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::User => "user",
            Self::Viewer => "viewer",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Owner => "Owner",
            Self::User => "User",
            Self::Viewer => "Viewer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Owner => "Full control of the tenant's projects, packages and members",
            Self::User => "Create and publish packages within the tenant",
            Self::Viewer => "Read-only access with package downloads",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::all().into_iter().find(|r| r.code() == code)
    }

    pub fn sidebar(&self) -> Vec<SidebarItem> {
        use SidebarItem::*;
        match self {
            Self::Owner => SidebarItem::all().to_vec(),
            Self::User => vec![Dashboard, Projects, Packages, Releases, Shares],
            Self::Viewer => vec![Dashboard, Projects, Packages, Releases],
        }
    }

    pub fn project_actions(&self) -> Vec<ProjectAction> {
        use ProjectAction::*;
        match self {
            Self::Owner => ProjectAction::all().to_vec(),
            Self::User => vec![Read, Create, Update],
            Self::Viewer => vec![Read],
        }
    }

    pub fn package_actions(&self) -> Vec<PackageAction> {
        use PackageAction::*;
        match self {
            Self::Owner => PackageAction::all().to_vec(),
            Self::User => vec![Read, Create, Update, Upload, Download, Publish],
            Self::Viewer => vec![Read, Download],
        }
    }

    /// Grant facts this role holds in `tenant` from the fixed vocabularies.
    pub fn grants(&self, tenant: &str) -> Vec<GrantFact> {
        let code = self.code();
        let mut grants = Vec::new();
        grants.extend(
            self.sidebar()
                .into_iter()
                .map(|i| GrantFact::new(code, tenant, SIDEBAR_OBJECT, i.as_str())),
        );
        grants.extend(
            self.project_actions()
                .into_iter()
                .map(|a| GrantFact::new(code, tenant, PROJECT_OBJECT, a.as_str())),
        );
        grants.extend(
            self.package_actions()
                .into_iter()
                .map(|a| GrantFact::new(code, tenant, PACKAGE_OBJECT, a.as_str())),
        );
        grants
    }

    pub fn all() -> Vec<DefaultTenantRole> {
        vec![Self::Owner, Self::User, Self::Viewer]
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
