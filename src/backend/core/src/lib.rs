#![allow(clippy::result_large_err)]
//! # Depot Core
//!
//! Multi-tenant authorization core of the Depot package distribution backend.
//!
//! ## Architecture
//!
//! - **Policy Store**: durable grant and grouping facts, write-through to a pluggable adapter
//! - **Enforcement Engine**: `(subject, domain, object, action)` decisions with in-domain
//!   role inheritance and the `"*"` administrator domain
//! - **Permission Catalog**: roles, menus, menu actions and user/tenant/role assignments
//! - **Synchronizer**: projects the catalog into policy facts, incrementally or by full rebuild
//! - **Resolution**: sidebar/project/package permission sets, permission keys, menu trees
//! - **Telemetry**: structured logging and metric definitions

pub mod catalog;
pub mod config;
pub mod handle;
pub mod db;
pub mod error;
pub mod rbac;
pub mod resolve;
pub mod sync;
pub mod telemetry;

pub use crate::handle::AuthzCore;
pub use error::{DepotError, ErrorCode, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::{
        HttpMethod, Menu, MenuAction, MenuNode, NewMenu, NewMenuAction, NewRole,
        PermissionCatalog, Role, UserTenantRole,
    };
    pub use crate::config::Config;
    pub use crate::handle::AuthzCore;
    pub use crate::error::{DepotError, ErrorCode, Result};
    pub use crate::rbac::{
        DefaultTenantRole, Enforcer, GrantFact, GroupingFact, PackageAction, PolicyDecision,
        PolicyStore, ProjectAction, SidebarItem, ADMIN_ROLE, SYSTEM_DOMAIN, WILDCARD_DOMAIN,
    };
    pub use crate::resolve::PermissionResolver;
    pub use crate::sync::{Synchronizer, SyncReport};
}
