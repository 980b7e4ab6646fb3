//! Declarative permission catalog.
//!
//! Roles, menus, menu actions and user/tenant/role assignments, stored as
//! ordinary records. The catalog is the source of truth; the policy store
//! holds a derived projection maintained by [`crate::sync::Synchronizer`].

pub mod models;
pub mod repository;
pub mod service;
pub mod tree;

pub use models::{
    HttpMethod, Menu, MenuAction, MenuActionId, MenuActionUpdate, MenuId, MenuNode, MenuUpdate,
    NewMenu, NewMenuAction, NewRole, Role, RoleId, RoleUpdate, UserTenantRole,
};
pub use repository::{CatalogRepository, InMemoryCatalog};
pub use service::PermissionCatalog;
pub use tree::build_menu_tree;
