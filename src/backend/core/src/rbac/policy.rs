//! Enforcement engine for evaluating authorization decisions.
//!
//! The engine answers the question:
//! "Can subject S perform action A on object O within domain D?"
//!
//! A request is allowed when one of these holds, checked in order:
//! 1. a grant `(S, D, O, A)` exists;
//! 2. a role reachable from `S` through groupings in `D` has a grant in `D`;
//! 3. `S`, or a role reachable from `S` in the wildcard domain `"*"`, has a
//!    grant `(_, "*", O, A)`.
//!
//! There are no deny facts: anything not granted is denied. Domain matching
//! is exact apart from `"*"`; in particular `""` is the system domain and
//! never matches a tenant.

use metrics::counter;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use tracing::debug;

use super::models::{FactSet, GrantFact, WILDCARD_DOMAIN};
use super::store::PolicyStore;
use crate::error::{DepotError, Result};
use crate::telemetry::metrics::DECISIONS_TOTAL;

/// Maximum length of a role-inheritance chain inside one domain.
pub const MAX_ROLE_DEPTH: usize = 10;

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// How an allowed request matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", content = "role", rename_all = "snake_case")]
pub enum MatchPath {
    /// The subject holds the grant itself.
    Direct,
    /// Granted through a role held in the requested domain.
    Role(String),
    /// Granted under the wildcard domain to the subject or one of its roles.
    Wildcard(String),
}

impl fmt::Display for MatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct grant"),
            Self::Role(role) => write!(f, "role '{}'", role),
            Self::Wildcard(subject) => write!(f, "wildcard grant to '{}'", subject),
        }
    }
}

/// Result of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "path", rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow(MatchPath),
    Deny,
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Enforcer
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluates requests against the facts held by a [`PolicyStore`].
///
/// Cheap to clone; every clone shares the same store.
#[derive(Debug, Clone)]
pub struct Enforcer {
    store: PolicyStore,
}

impl Enforcer {
    pub fn new(store: PolicyStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization checks
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide whether `subject` may perform `action` on `object` in `domain`.
    pub async fn enforce(
        &self,
        subject: &str,
        domain: &str,
        object: &str,
        action: &str,
    ) -> Result<bool> {
        Ok(self.decide(subject, domain, object, action).await?.is_allowed())
    }

    /// Like [`enforce`](Self::enforce) but reports which path matched.
    pub async fn decide(
        &self,
        subject: &str,
        domain: &str,
        object: &str,
        action: &str,
    ) -> Result<PolicyDecision> {
        validate_request(subject, object, action)?;
        let facts = self.store.read().await;
        let decision = evaluate(&facts, subject, domain, object, action);
        record_decision(subject, domain, object, action, &decision);
        Ok(decision)
    }

    /// Evaluate several `(object, action)` pairs for one subject under a
    /// single read lock. Results are in input order.
    pub async fn enforce_many(
        &self,
        subject: &str,
        domain: &str,
        requests: &[(&str, &str)],
    ) -> Result<Vec<bool>> {
        for (object, action) in requests {
            validate_request(subject, object, action)?;
        }
        let facts = self.store.read().await;
        Ok(requests
            .iter()
            .map(|(object, action)| {
                let decision = evaluate(&facts, subject, domain, object, action);
                record_decision(subject, domain, object, action, &decision);
                decision.is_allowed()
            })
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Roles held directly by `user` in `domain`.
    pub async fn roles_of(&self, user: &str, domain: &str) -> Vec<String> {
        self.store.read().await.roles_for(user, domain)
    }

    /// Every role reachable from `user` in `domain`, including inherited ones.
    pub async fn implicit_roles_of(&self, user: &str, domain: &str) -> Vec<String> {
        let facts = self.store.read().await;
        reachable_roles(&facts, user, domain).into_iter().collect()
    }

    /// Users (and roles) holding `role` directly in `domain`.
    pub async fn users_of(&self, role: &str, domain: &str) -> Vec<String> {
        self.store.read().await.users_for(role, domain)
    }

    /// Every grant that can authorize `user` in `domain`, as stored
    /// (the subject is the user or the role that holds the grant).
    pub async fn effective_permissions(&self, user: &str, domain: &str) -> Result<Vec<GrantFact>> {
        if user.is_empty() {
            return Err(DepotError::missing_field("user"));
        }
        let facts = self.store.read().await;
        let mut out = BTreeSet::new();

        let mut in_domain = vec![user.to_string()];
        in_domain.extend(reachable_roles(&facts, user, domain));
        for subject in &in_domain {
            for (object, action) in facts.grants_for(subject, domain) {
                out.insert(GrantFact::new(subject.clone(), domain, object, action));
            }
        }

        if domain != WILDCARD_DOMAIN {
            for subject in wildcard_subjects(&facts, user) {
                for (object, action) in facts.grants_for(&subject, WILDCARD_DOMAIN) {
                    out.insert(GrantFact::new(subject.clone(), WILDCARD_DOMAIN, object, action));
                }
            }
        }

        Ok(out.into_iter().collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Evaluation
// ═══════════════════════════════════════════════════════════════════════════════

fn validate_request(subject: &str, object: &str, action: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(DepotError::missing_field("subject"));
    }
    if object.is_empty() {
        return Err(DepotError::missing_field("object"));
    }
    if action.is_empty() {
        return Err(DepotError::missing_field("action"));
    }
    Ok(())
}

pub(crate) fn evaluate(
    facts: &FactSet,
    subject: &str,
    domain: &str,
    object: &str,
    action: &str,
) -> PolicyDecision {
    if facts.contains_grant(subject, domain, object, action) {
        return PolicyDecision::Allow(MatchPath::Direct);
    }

    for role in reachable_roles(facts, subject, domain) {
        if facts.contains_grant(&role, domain, object, action) {
            return PolicyDecision::Allow(MatchPath::Role(role));
        }
    }

    if domain != WILDCARD_DOMAIN {
        for candidate in wildcard_subjects(facts, subject) {
            if facts.contains_grant(&candidate, WILDCARD_DOMAIN, object, action) {
                return PolicyDecision::Allow(MatchPath::Wildcard(candidate));
            }
        }
    }

    PolicyDecision::Deny
}

/// Breadth-first walk of groupings within exactly `domain`, bounded by
/// [`MAX_ROLE_DEPTH`]. The starting subject is not part of the result.
fn reachable_roles(facts: &FactSet, subject: &str, domain: &str) -> BTreeSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = BTreeSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();

    seen.insert(subject.to_string());
    queue.push_back((subject.to_string(), 0));

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= MAX_ROLE_DEPTH {
            continue;
        }
        for role in facts.roles_for(&current, domain) {
            if seen.insert(role.clone()) {
                out.insert(role.clone());
                queue.push_back((role, depth + 1));
            }
        }
    }

    out
}

/// The subject itself plus every role it holds in the wildcard domain.
fn wildcard_subjects(facts: &FactSet, subject: &str) -> Vec<String> {
    let mut subjects = vec![subject.to_string()];
    subjects.extend(reachable_roles(facts, subject, WILDCARD_DOMAIN));
    subjects
}

fn record_decision(subject: &str, domain: &str, object: &str, action: &str, decision: &PolicyDecision) {
    let result = if decision.is_allowed() { "allow" } else { "deny" };
    counter!(DECISIONS_TOTAL, "result" => result).increment(1);
    debug!(
        subject = subject,
        domain = domain,
        object = object,
        action = action,
        decision = ?decision,
        "Authorization decision"
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::adapter::MemoryAdapter;
    use crate::rbac::models::GroupingFact;
    use std::sync::Arc;

    async fn setup_enforcer() -> Enforcer {
        let store = PolicyStore::open(Arc::new(MemoryAdapter::new())).await.unwrap();
        Enforcer::new(store)
    }

    async fn grant(e: &Enforcer, sub: &str, dom: &str, obj: &str, act: &str) {
        e.store()
            .add_grant(GrantFact::new(sub, dom, obj, act))
            .await
            .unwrap();
    }

    async fn bind(e: &Enforcer, user: &str, role: &str, dom: &str) {
        e.store()
            .add_grouping(GroupingFact::new(user, role, dom))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_direct_grant() {
        let e = setup_enforcer().await;
        grant(&e, "alice", "t1", "project", "read").await;

        assert_eq!(
            e.decide("alice", "t1", "project", "read").await.unwrap(),
            PolicyDecision::Allow(MatchPath::Direct)
        );
        assert!(!e.enforce("alice", "t1", "project", "write").await.unwrap());
    }

    #[tokio::test]
    async fn test_role_in_domain() {
        let e = setup_enforcer().await;
        grant(&e, "owner", "t1", "project", "write").await;
        bind(&e, "alice", "owner", "t1").await;

        assert_eq!(
            e.decide("alice", "t1", "project", "write").await.unwrap(),
            PolicyDecision::Allow(MatchPath::Role("owner".into()))
        );
        assert!(!e.enforce("alice", "t2", "project", "write").await.unwrap());
    }

    #[tokio::test]
    async fn test_transitive_roles() {
        let e = setup_enforcer().await;
        grant(&e, "viewer", "t1", "package", "read").await;
        bind(&e, "editor", "viewer", "t1").await;
        bind(&e, "bob", "editor", "t1").await;

        assert!(e.enforce("bob", "t1", "package", "read").await.unwrap());
        assert_eq!(
            e.implicit_roles_of("bob", "t1").await,
            vec!["editor".to_string(), "viewer".to_string()]
        );
        assert_eq!(e.roles_of("bob", "t1").await, vec!["editor".to_string()]);
    }

    #[tokio::test]
    async fn test_role_cycle_terminates() {
        let e = setup_enforcer().await;
        bind(&e, "a", "b", "t1").await;
        bind(&e, "b", "a", "t1").await;
        bind(&e, "u", "a", "t1").await;

        assert!(!e.enforce("u", "t1", "project", "read").await.unwrap());
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let e = setup_enforcer().await;
        let chain: Vec<String> = (0..=MAX_ROLE_DEPTH + 1).map(|i| format!("r{}", i)).collect();
        bind(&e, "u", &chain[0], "t1").await;
        for pair in chain.windows(2) {
            bind(&e, &pair[0], &pair[1], "t1").await;
        }
        grant(&e, chain.last().unwrap(), "t1", "project", "read").await;

        assert!(!e.enforce("u", "t1", "project", "read").await.unwrap());
    }

    #[tokio::test]
    async fn test_wildcard_bypass() {
        let e = setup_enforcer().await;
        grant(&e, "admin", "*", "project", "write").await;
        bind(&e, "root", "admin", "*").await;

        for tenant in ["t1", "t-anything", ""] {
            assert_eq!(
                e.decide("root", tenant, "project", "write").await.unwrap(),
                PolicyDecision::Allow(MatchPath::Wildcard("admin".into()))
            );
        }
    }

    #[tokio::test]
    async fn test_role_held_in_tenant_does_not_reach_wildcard() {
        let e = setup_enforcer().await;
        grant(&e, "admin", "*", "project", "write").await;
        bind(&e, "mallory", "admin", "t1").await;

        assert!(!e.enforce("mallory", "t1", "project", "write").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_domain_is_exact() {
        let e = setup_enforcer().await;
        grant(&e, "auditor", "", "release", "read").await;
        bind(&e, "carol", "auditor", "").await;

        assert!(e.enforce("carol", "", "release", "read").await.unwrap());
        assert!(!e.enforce("carol", "t1", "release", "read").await.unwrap());

        grant(&e, "dave", "t1", "release", "read").await;
        assert!(!e.enforce("dave", "", "release", "read").await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_request_is_error() {
        let e = setup_enforcer().await;
        assert!(e.enforce("", "t1", "project", "read").await.is_err());
        assert!(e.enforce("alice", "t1", "", "read").await.is_err());
        assert!(e.enforce("alice", "t1", "project", "").await.is_err());
        assert!(e.enforce("alice", "", "project", "read").await.is_ok());
    }

    #[tokio::test]
    async fn test_enforce_many() {
        let e = setup_enforcer().await;
        grant(&e, "viewer", "t1", "sidebar", "dashboard").await;
        bind(&e, "u1", "viewer", "t1").await;

        let results = e
            .enforce_many("u1", "t1", &[("sidebar", "dashboard"), ("sidebar", "settings")])
            .await
            .unwrap();
        assert_eq!(results, vec![true, false]);
    }

    #[tokio::test]
    async fn test_effective_permissions() {
        let e = setup_enforcer().await;
        grant(&e, "u1", "t1", "project", "read").await;
        grant(&e, "owner", "t1", "project", "write").await;
        grant(&e, "owner", "t2", "project", "delete").await;
        grant(&e, "admin", "*", "settings", "manage").await;
        bind(&e, "u1", "owner", "t1").await;
        bind(&e, "u1", "admin", "*").await;

        let perms = e.effective_permissions("u1", "t1").await.unwrap();
        assert_eq!(
            perms,
            vec![
                GrantFact::new("admin", "*", "settings", "manage"),
                GrantFact::new("owner", "t1", "project", "write"),
                GrantFact::new("u1", "t1", "project", "read"),
            ]
        );
    }

    #[tokio::test]
    async fn test_users_of() {
        let e = setup_enforcer().await;
        bind(&e, "u1", "owner", "t1").await;
        bind(&e, "u2", "owner", "t1").await;
        bind(&e, "u3", "owner", "t2").await;

        assert_eq!(e.users_of("owner", "t1").await, vec!["u1".to_string(), "u2".to_string()]);
    }
}
