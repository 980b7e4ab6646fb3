//! Catalog data models: Role, Menu, MenuAction, and user/tenant/role assignments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DepotError, Result};
use crate::rbac::models::{SYSTEM_DOMAIN, WILDCARD_DOMAIN};

pub type RoleId = i64;
pub type MenuId = i64;
pub type MenuActionId = i64;

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// A named set of menus, either owned by one tenant or system-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    /// Stable code used as the subject in grant and grouping facts.
    pub code: String,
    pub name: String,
    pub description: String,
    /// Owning tenant; `None` marks a system role.
    pub tenant_id: Option<String>,
    /// System roles cannot be mutated or deleted.
    pub is_system: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Domain this role's grants are materialised in.
    pub fn domain(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or(SYSTEM_DOMAIN)
    }

    pub fn is_tenant_role(&self) -> bool {
        self.tenant_id.is_some()
    }
}

/// Input for creating a role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRole {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub is_system: bool,
}

impl NewRole {
    pub fn tenant(tenant_id: impl Into<String>, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            tenant_id: Some(tenant_id.into()),
            ..Default::default()
        }
    }

    pub fn system(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            is_system: true,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_code(&self.code)?;
        if self.name.trim().is_empty() {
            return Err(DepotError::missing_field("name"));
        }
        validate_tenant(self.tenant_id.as_deref())
    }
}

/// Partial update of a role. Activation goes through `set_role_active`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Menu
// ═══════════════════════════════════════════════════════════════════════════════

/// A node in the navigation tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub id: MenuId,
    pub name: String,
    pub path: String,
    pub sort: i32,
    pub visible: bool,
    pub is_system: bool,
    /// Owning tenant; `None` marks a global menu.
    pub tenant_id: Option<String>,
    pub parent_id: Option<MenuId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMenu {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub sort: i32,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<MenuId>,
}

fn default_visible() -> bool {
    true
}

impl NewMenu {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            sort: 0,
            visible: true,
            is_system: false,
            tenant_id: None,
            parent_id: None,
        }
    }

    pub fn under(mut self, parent_id: MenuId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn sorted(mut self, sort: i32) -> Self {
        self.sort = sort;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DepotError::missing_field("name"));
        }
        if self.path.trim().is_empty() {
            return Err(DepotError::missing_field("path"));
        }
        validate_tenant(self.tenant_id.as_deref())
    }
}

/// Partial update of a menu. `parent_id: Some(None)` moves it to the root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuUpdate {
    pub name: Option<String>,
    pub path: Option<String>,
    pub sort: Option<i32>,
    pub visible: Option<bool>,
    pub parent_id: Option<Option<MenuId>>,
}

/// A menu with its permitted children, as returned by tree queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuNode {
    #[serde(flatten)]
    pub menu: Menu,
    pub children: Vec<MenuNode>,
}

impl MenuNode {
    /// Depth-first list of every menu id in this subtree.
    pub fn ids(&self) -> Vec<MenuId> {
        let mut ids = vec![self.menu.id];
        for child in &self.children {
            ids.extend(child.ids());
        }
        ids
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Menu Action
// ═══════════════════════════════════════════════════════════════════════════════

/// HTTP method hint attached to a menu action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Any,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Any => "ANY",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "ANY" | "*" => Ok(Self::Any),
            other => Err(DepotError::new(
                crate::error::ErrorCode::InvalidFormat,
                format!("unknown HTTP method: {}", other),
            )),
        }
    }
}

/// The atomic permission unit of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuAction {
    pub id: MenuActionId,
    pub menu_id: MenuId,
    /// Action name; becomes the `action` of the derived grant.
    pub code: String,
    /// Resource name; becomes the `object` of the derived grant.
    pub resource: String,
    pub method: HttpMethod,
    /// Globally unique handle used by callers that do not know about roles.
    pub permission_key: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMenuAction {
    pub menu_id: MenuId,
    pub code: String,
    pub resource: String,
    pub method: HttpMethod,
    pub permission_key: String,
    #[serde(default)]
    pub is_system: bool,
}

impl NewMenuAction {
    pub fn new(
        menu_id: MenuId,
        code: impl Into<String>,
        resource: impl Into<String>,
        method: HttpMethod,
        permission_key: impl Into<String>,
    ) -> Self {
        Self {
            menu_id,
            code: code.into(),
            resource: resource.into(),
            method,
            permission_key: permission_key.into(),
            is_system: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(DepotError::missing_field("code"));
        }
        if self.resource.trim().is_empty() {
            return Err(DepotError::missing_field("resource"));
        }
        if self.permission_key.trim().is_empty() {
            return Err(DepotError::missing_field("permission_key"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuActionUpdate {
    pub code: Option<String>,
    pub resource: Option<String>,
    pub method: Option<HttpMethod>,
    pub permission_key: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Assignments
// ═══════════════════════════════════════════════════════════════════════════════

/// A user holds the role `role_code` within `tenant_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTenantRole {
    pub id: i64,
    pub user_id: String,
    pub tenant_id: String,
    pub role_code: String,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validation helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Role codes are lowercase ASCII letters, digits, `_` and `-`.
pub fn validate_code(code: &str) -> Result<()> {
    if code.is_empty() {
        return Err(DepotError::missing_field("code"));
    }
    let valid = code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid {
        return Err(DepotError::new(
            crate::error::ErrorCode::InvalidFormat,
            format!("invalid role code '{}': use [a-z0-9_-]", code),
        ));
    }
    Ok(())
}

fn validate_tenant(tenant_id: Option<&str>) -> Result<()> {
    match tenant_id {
        Some(t) if t.is_empty() => Err(DepotError::missing_field("tenant_id")),
        Some(t) if t == WILDCARD_DOMAIN => Err(DepotError::validation(
            "the wildcard domain cannot own catalog records",
        )),
        _ => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_code_validation() {
        assert!(validate_code("owner").is_ok());
        assert!(validate_code("release-manager_2").is_ok());
        assert!(validate_code("").is_err());
        assert!(validate_code("Owner").is_err());
        assert!(validate_code("a b").is_err());
    }

    #[test]
    fn test_new_role_rejects_wildcard_tenant() {
        assert!(NewRole::tenant("*", "owner", "Owner").validate().is_err());
        assert!(NewRole::tenant("", "owner", "Owner").validate().is_err());
        assert!(NewRole::tenant("t1", "owner", "Owner").validate().is_ok());
        assert!(NewRole::system("admin", "Admin").validate().is_ok());
    }

    #[test]
    fn test_http_method_parse() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("*".parse::<HttpMethod>().unwrap(), HttpMethod::Any);
        assert!("FETCH".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_new_menu_builder() {
        let menu = NewMenu::new("Settings", "/settings").for_tenant("t1").under(3).sorted(5).hidden();
        assert_eq!(menu.tenant_id.as_deref(), Some("t1"));
        assert_eq!(menu.parent_id, Some(3));
        assert_eq!(menu.sort, 5);
        assert!(!menu.visible);
        assert!(menu.validate().is_ok());
        assert!(NewMenu::new("", "/x").validate().is_err());
    }
}
