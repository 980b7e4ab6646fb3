//! Policy fact models: grant facts, grouping facts, and the indexed fact set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::{DepotError, Result};

/// Reserved domain granting cross-tenant visibility. Only the administrator
/// bootstrap writes grants here.
pub const WILDCARD_DOMAIN: &str = "*";

/// Domain used for system (tenant-less) roles. A real key, never "any".
pub const SYSTEM_DOMAIN: &str = "";

// ═══════════════════════════════════════════════════════════════════════════════
// Facts
// ═══════════════════════════════════════════════════════════════════════════════

/// `subject` may perform `action` on `object` within `domain`.
///
/// `subject` is either a user identifier or a role code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantFact {
    pub subject: String,
    pub domain: String,
    pub object: String,
    pub action: String,
}

impl GrantFact {
    pub fn new(
        subject: impl Into<String>,
        domain: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    /// Reject facts with an empty subject, object or action. The domain may be
    /// empty: that is the system domain.
    pub fn validate(&self) -> Result<()> {
        if self.subject.is_empty() {
            return Err(DepotError::missing_field("subject"));
        }
        if self.object.is_empty() {
            return Err(DepotError::missing_field("object"));
        }
        if self.action.is_empty() {
            return Err(DepotError::missing_field("action"));
        }
        Ok(())
    }

    /// Tuple form `[subject, domain, object, action]`.
    pub fn to_vec(&self) -> Vec<String> {
        vec![
            self.subject.clone(),
            self.domain.clone(),
            self.object.clone(),
            self.action.clone(),
        ]
    }
}

impl fmt::Display for GrantFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p, {}, {}, {}, {}",
            self.subject, self.domain, self.object, self.action
        )
    }
}

/// `user` holds `role` within `domain`.
///
/// `user` may itself be a role code, which gives role-to-role inheritance
/// inside a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupingFact {
    pub user: String,
    pub role: String,
    pub domain: String,
}

impl GroupingFact {
    pub fn new(
        user: impl Into<String>,
        role: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            domain: domain.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() {
            return Err(DepotError::missing_field("user"));
        }
        if self.role.is_empty() {
            return Err(DepotError::missing_field("role"));
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<String> {
        vec![self.user.clone(), self.role.clone(), self.domain.clone()]
    }
}

impl fmt::Display for GroupingFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g, {}, {}, {}", self.user, self.role, self.domain)
    }
}

/// A single mutation, as handed to persistence adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactChange {
    AddGrant(GrantFact),
    RemoveGrant(GrantFact),
    AddGrouping(GroupingFact),
    RemoveGrouping(GroupingFact),
}

impl FactChange {
    /// The change that undoes this one.
    pub fn inverse(&self) -> FactChange {
        match self {
            Self::AddGrant(g) => Self::RemoveGrant(g.clone()),
            Self::RemoveGrant(g) => Self::AddGrant(g.clone()),
            Self::AddGrouping(g) => Self::RemoveGrouping(g.clone()),
            Self::RemoveGrouping(g) => Self::AddGrouping(g.clone()),
        }
    }
}

/// Serializable dump of every fact, used by snapshot adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSnapshot {
    #[serde(default)]
    pub grants: Vec<GrantFact>,
    #[serde(default)]
    pub groupings: Vec<GroupingFact>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Fact Set
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory fact base.
///
/// Grants are indexed by `(domain, subject)` so that evaluation and listing
/// cost O(grants-for-subject). Groupings are indexed both ways:
/// `(user, domain) -> roles` and `(role, domain) -> users`.
#[derive(Debug, Clone, Default)]
pub struct FactSet {
    grants: BTreeSet<GrantFact>,
    groupings: BTreeSet<GroupingFact>,
    grants_by_subject: HashMap<(String, String), BTreeSet<(String, String)>>,
    roles_by_user: HashMap<(String, String), BTreeSet<String>>,
    users_by_role: HashMap<(String, String), BTreeSet<String>>,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: FactSnapshot) -> Self {
        let mut set = Self::new();
        for grant in snapshot.grants {
            set.insert_grant(grant);
        }
        for grouping in snapshot.groupings {
            set.insert_grouping(grouping);
        }
        set
    }

    pub fn snapshot(&self) -> FactSnapshot {
        FactSnapshot {
            grants: self.grants.iter().cloned().collect(),
            groupings: self.groupings.iter().cloned().collect(),
        }
    }

    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }

    pub fn grouping_count(&self) -> usize {
        self.groupings.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a grant. Returns `false` if it was already present.
    pub fn insert_grant(&mut self, fact: GrantFact) -> bool {
        if self.grants.contains(&fact) {
            return false;
        }
        self.grants_by_subject
            .entry((fact.domain.clone(), fact.subject.clone()))
            .or_default()
            .insert((fact.object.clone(), fact.action.clone()));
        self.grants.insert(fact)
    }

    /// Remove a grant. Returns `false` if it was absent.
    pub fn remove_grant(&mut self, fact: &GrantFact) -> bool {
        if !self.grants.remove(fact) {
            return false;
        }
        let key = (fact.domain.clone(), fact.subject.clone());
        if let Some(pairs) = self.grants_by_subject.get_mut(&key) {
            pairs.remove(&(fact.object.clone(), fact.action.clone()));
            if pairs.is_empty() {
                self.grants_by_subject.remove(&key);
            }
        }
        true
    }

    pub fn contains_grant(&self, subject: &str, domain: &str, object: &str, action: &str) -> bool {
        self.grants_by_subject
            .get(&(domain.to_string(), subject.to_string()))
            .map(|pairs| pairs.contains(&(object.to_string(), action.to_string())))
            .unwrap_or(false)
    }

    /// All `(object, action)` pairs granted to `subject` in exactly `domain`.
    pub fn grants_for(&self, subject: &str, domain: &str) -> Vec<(String, String)> {
        self.grants_by_subject
            .get(&(domain.to_string(), subject.to_string()))
            .map(|pairs| pairs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn grants(&self) -> impl Iterator<Item = &GrantFact> {
        self.grants.iter()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Groupings
    // ─────────────────────────────────────────────────────────────────────────

    pub fn insert_grouping(&mut self, fact: GroupingFact) -> bool {
        if self.groupings.contains(&fact) {
            return false;
        }
        self.roles_by_user
            .entry((fact.user.clone(), fact.domain.clone()))
            .or_default()
            .insert(fact.role.clone());
        self.users_by_role
            .entry((fact.role.clone(), fact.domain.clone()))
            .or_default()
            .insert(fact.user.clone());
        self.groupings.insert(fact)
    }

    pub fn remove_grouping(&mut self, fact: &GroupingFact) -> bool {
        if !self.groupings.remove(fact) {
            return false;
        }
        let user_key = (fact.user.clone(), fact.domain.clone());
        if let Some(roles) = self.roles_by_user.get_mut(&user_key) {
            roles.remove(&fact.role);
            if roles.is_empty() {
                self.roles_by_user.remove(&user_key);
            }
        }
        let role_key = (fact.role.clone(), fact.domain.clone());
        if let Some(users) = self.users_by_role.get_mut(&role_key) {
            users.remove(&fact.user);
            if users.is_empty() {
                self.users_by_role.remove(&role_key);
            }
        }
        true
    }

    /// Roles held directly by `user` in exactly `domain`.
    pub fn roles_for(&self, user: &str, domain: &str) -> Vec<String> {
        self.roles_by_user
            .get(&(user.to_string(), domain.to_string()))
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Users (or roles) holding `role` directly in exactly `domain`.
    pub fn users_for(&self, role: &str, domain: &str) -> Vec<String> {
        self.users_by_role
            .get(&(role.to_string(), domain.to_string()))
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn groupings(&self) -> impl Iterator<Item = &GroupingFact> {
        self.groupings.iter()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Changes
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a change. Returns whether the set was modified.
    pub fn apply(&mut self, change: &FactChange) -> bool {
        match change {
            FactChange::AddGrant(g) => self.insert_grant(g.clone()),
            FactChange::RemoveGrant(g) => self.remove_grant(g),
            FactChange::AddGrouping(g) => self.insert_grouping(g.clone()),
            FactChange::RemoveGrouping(g) => self.remove_grouping(g),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_validation() {
        assert!(GrantFact::new("alice", "", "project", "read").validate().is_ok());
        assert!(GrantFact::new("", "t1", "project", "read").validate().is_err());
        assert!(GrantFact::new("alice", "t1", "", "read").validate().is_err());
        assert!(GrantFact::new("alice", "t1", "project", "").validate().is_err());
    }

    #[test]
    fn test_insert_grant_is_idempotent() {
        let mut set = FactSet::new();
        let fact = GrantFact::new("owner", "t1", "project", "write");
        assert!(set.insert_grant(fact.clone()));
        assert!(!set.insert_grant(fact.clone()));
        assert_eq!(set.grant_count(), 1);
        assert!(set.contains_grant("owner", "t1", "project", "write"));
    }

    #[test]
    fn test_remove_grant_cleans_index() {
        let mut set = FactSet::new();
        let fact = GrantFact::new("owner", "t1", "project", "write");
        set.insert_grant(fact.clone());
        assert!(set.remove_grant(&fact));
        assert!(!set.remove_grant(&fact));
        assert!(set.grants_for("owner", "t1").is_empty());
        assert!(!set.contains_grant("owner", "t1", "project", "write"));
    }

    #[test]
    fn test_grouping_indexes() {
        let mut set = FactSet::new();
        set.insert_grouping(GroupingFact::new("u1", "owner", "t1"));
        set.insert_grouping(GroupingFact::new("u2", "owner", "t1"));
        set.insert_grouping(GroupingFact::new("u1", "viewer", "t2"));

        assert_eq!(set.roles_for("u1", "t1"), vec!["owner".to_string()]);
        assert_eq!(set.users_for("owner", "t1"), vec!["u1".to_string(), "u2".to_string()]);
        assert!(set.roles_for("u1", "").is_empty());

        set.remove_grouping(&GroupingFact::new("u1", "owner", "t1"));
        assert!(set.roles_for("u1", "t1").is_empty());
        assert_eq!(set.users_for("owner", "t1"), vec!["u2".to_string()]);
    }

    #[test]
    fn test_snapshot_rebuilds_indexes() {
        let mut set = FactSet::new();
        set.insert_grant(GrantFact::new("admin", "*", "project", "read"));
        set.insert_grouping(GroupingFact::new("root", "admin", "*"));

        let restored = FactSet::from_snapshot(set.snapshot());
        assert!(restored.contains_grant("admin", "*", "project", "read"));
        assert_eq!(restored.roles_for("root", "*"), vec!["admin".to_string()]);
    }

    #[test]
    fn test_change_inverse() {
        let mut set = FactSet::new();
        let change = FactChange::AddGrant(GrantFact::new("a", "t", "o", "x"));
        assert!(set.apply(&change));
        assert!(set.apply(&change.inverse()));
        assert_eq!(set.grant_count(), 0);
    }
}
