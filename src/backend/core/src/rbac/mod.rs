//! Tuple-based policy store and enforcement engine.
//!
//! This module provides:
//! - **Models**: grant facts `(subject, domain, object, action)` and grouping
//!   facts `(user, role, domain)`
//! - **Store**: the write-through [`PolicyStore`] with pluggable adapters
//! - **Enforcer**: evaluates requests with in-domain role resolution and the
//!   wildcard administrator domain
//! - **Roles**: the fixed vocabularies and default tenant roles
//!
//! # Usage
//!
//! ```rust,ignore
//! use depot_core::rbac::{Enforcer, FileAdapter, GrantFact, GroupingFact, PolicyStore};
//!
//! let store = PolicyStore::open(Arc::new(FileAdapter::new("policy.json"))).await?;
//! store.add_grant(GrantFact::new("owner", "t1", "project", "write")).await?;
//! store.add_grouping(GroupingFact::new("alice", "owner", "t1")).await?;
//!
//! let enforcer = Enforcer::new(store);
//! assert!(enforcer.enforce("alice", "t1", "project", "write").await?);
//! ```

pub mod adapter;
pub mod models;
pub mod policy;
pub mod roles;
pub mod store;

pub use adapter::{FileAdapter, MemoryAdapter, PolicyAdapter};
pub use models::{
    FactChange, FactSet, FactSnapshot, GrantFact, GroupingFact, SYSTEM_DOMAIN, WILDCARD_DOMAIN,
};
pub use policy::{Enforcer, MatchPath, PolicyDecision, MAX_ROLE_DEPTH};
pub use roles::{
    DefaultTenantRole, PackageAction, ProjectAction, SidebarItem, ADMIN_ROLE, PACKAGE_OBJECT,
    PROJECT_OBJECT, SIDEBAR_OBJECT,
};
pub use store::PolicyStore;
