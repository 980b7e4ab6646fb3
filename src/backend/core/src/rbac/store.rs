//! The policy store: durable fact base of grant and grouping facts.
//!
//! The in-memory [`FactSet`] sits behind a `tokio::sync::RwLock`. Mutations
//! take the write lock, apply the change, persist it through the adapter
//! while still holding the lock, and roll the in-memory change back if the
//! write fails. Readers therefore never observe a fact that is not durable.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, error, info};

use super::adapter::PolicyAdapter;
use super::models::{FactChange, FactSet, FactSnapshot, GrantFact, GroupingFact};
use crate::error::Result;

/// Shared, write-through store for policy facts.
#[derive(Clone)]
pub struct PolicyStore {
    facts: Arc<RwLock<FactSet>>,
    adapter: Arc<dyn PolicyAdapter>,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("backend", &self.adapter.backend_name())
            .finish()
    }
}

impl PolicyStore {
    /// Create a store and load every persisted fact from `adapter`.
    pub async fn open(adapter: Arc<dyn PolicyAdapter>) -> Result<Self> {
        let store = Self {
            facts: Arc::new(RwLock::new(FactSet::new())),
            adapter,
        };
        store.load().await?;
        Ok(store)
    }

    pub fn backend_name(&self) -> &'static str {
        self.adapter.backend_name()
    }

    pub fn is_durable(&self) -> bool {
        self.adapter.is_durable()
    }

    /// Read access to the fact set for evaluation.
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, FactSet> {
        self.facts.read().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence boundary
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace the in-memory facts with the persisted ones.
    pub async fn load(&self) -> Result<()> {
        let snapshot = self.adapter.load().await?;
        let loaded = FactSet::from_snapshot(snapshot);
        info!(
            backend = self.adapter.backend_name(),
            grants = loaded.grant_count(),
            groupings = loaded.grouping_count(),
            "Policy facts loaded"
        );
        *self.facts.write().await = loaded;
        Ok(())
    }

    /// Write the full in-memory fact set to the adapter.
    pub async fn save(&self) -> Result<()> {
        let facts = self.facts.write().await;
        self.adapter.save(&facts.snapshot()).await
    }

    /// Atomically replace every fact. The new set is persisted first and
    /// only swapped in once the write has succeeded.
    pub async fn replace_all(&self, snapshot: FactSnapshot) -> Result<()> {
        let mut facts = self.facts.write().await;
        let replacement = FactSet::from_snapshot(snapshot);
        self.adapter.save(&replacement.snapshot()).await?;
        info!(
            grants = replacement.grant_count(),
            groupings = replacement.grouping_count(),
            "Policy facts replaced"
        );
        *facts = replacement;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a grant fact. Returns `false` (and writes nothing) if it exists.
    pub async fn add_grant(&self, fact: GrantFact) -> Result<bool> {
        fact.validate()?;
        let applied = self.commit(vec![FactChange::AddGrant(fact)]).await?;
        Ok(applied == 1)
    }

    /// Remove a grant fact. Returns `false` if it was absent.
    pub async fn remove_grant(&self, fact: GrantFact) -> Result<bool> {
        fact.validate()?;
        let applied = self.commit(vec![FactChange::RemoveGrant(fact)]).await?;
        Ok(applied == 1)
    }

    pub async fn add_grouping(&self, fact: GroupingFact) -> Result<bool> {
        fact.validate()?;
        let applied = self.commit(vec![FactChange::AddGrouping(fact)]).await?;
        Ok(applied == 1)
    }

    pub async fn remove_grouping(&self, fact: GroupingFact) -> Result<bool> {
        fact.validate()?;
        let applied = self.commit(vec![FactChange::RemoveGrouping(fact)]).await?;
        Ok(applied == 1)
    }

    /// Add many grants in one durable write. Returns how many were new.
    pub async fn add_grants(&self, facts: Vec<GrantFact>) -> Result<usize> {
        for fact in &facts {
            fact.validate()?;
        }
        self.commit(facts.into_iter().map(FactChange::AddGrant).collect())
            .await
    }

    /// Add many groupings in one durable write. Either all new groupings
    /// persist or none do.
    pub async fn add_groupings(&self, facts: Vec<GroupingFact>) -> Result<usize> {
        for fact in &facts {
            fact.validate()?;
        }
        self.commit(facts.into_iter().map(FactChange::AddGrouping).collect())
            .await
    }

    /// Remove every grant held by `role` in `domain` and every grouping onto
    /// it there, in one durable write. Returns the removals that took effect
    /// so a caller can [`revert`](Self::revert) them.
    pub async fn remove_role_facts(&self, role: &str, domain: &str) -> Result<Vec<FactChange>> {
        let mut facts = self.facts.write().await;
        let mut changes: Vec<FactChange> = facts
            .grants()
            .filter(|g| g.subject == role && g.domain == domain)
            .cloned()
            .map(FactChange::RemoveGrant)
            .collect();
        changes.extend(
            facts
                .groupings()
                .filter(|g| g.role == role && g.domain == domain)
                .cloned()
                .map(FactChange::RemoveGrouping),
        );
        self.apply_locked(&mut facts, changes).await
    }

    /// Undo previously applied changes in one durable write.
    pub async fn revert(&self, changes: &[FactChange]) -> Result<usize> {
        self.commit(changes.iter().rev().map(FactChange::inverse).collect())
            .await
    }

    /// Remove every grant matching the filter. `None` matches anything.
    pub async fn remove_filtered_grants(
        &self,
        subject: Option<&str>,
        domain: Option<&str>,
    ) -> Result<usize> {
        let mut facts = self.facts.write().await;
        let changes: Vec<FactChange> = facts
            .grants()
            .filter(|g| subject.map_or(true, |s| g.subject == s))
            .filter(|g| domain.map_or(true, |d| g.domain == d))
            .cloned()
            .map(FactChange::RemoveGrant)
            .collect();
        self.commit_locked(&mut facts, changes).await
    }

    /// Remove every grouping onto `role`, optionally limited to one domain.
    pub async fn remove_filtered_groupings(
        &self,
        role: &str,
        domain: Option<&str>,
    ) -> Result<usize> {
        let mut facts = self.facts.write().await;
        let changes: Vec<FactChange> = facts
            .groupings()
            .filter(|g| g.role == role)
            .filter(|g| domain.map_or(true, |d| g.domain == d))
            .cloned()
            .map(FactChange::RemoveGrouping)
            .collect();
        self.commit_locked(&mut facts, changes).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listing
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn all_grants(&self) -> Vec<GrantFact> {
        self.facts.read().await.grants().cloned().collect()
    }

    pub async fn all_groupings(&self) -> Vec<GroupingFact> {
        self.facts.read().await.groupings().cloned().collect()
    }

    pub async fn grant_count(&self) -> usize {
        self.facts.read().await.grant_count()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn commit(&self, changes: Vec<FactChange>) -> Result<usize> {
        let mut facts = self.facts.write().await;
        self.commit_locked(&mut facts, changes).await
    }

    async fn commit_locked(&self, facts: &mut FactSet, changes: Vec<FactChange>) -> Result<usize> {
        Ok(self.apply_locked(facts, changes).await?.len())
    }

    /// Apply `changes` in memory, persist the effective ones, and undo them
    /// if the adapter fails. Changes that were no-ops are never persisted.
    async fn apply_locked(
        &self,
        facts: &mut FactSet,
        changes: Vec<FactChange>,
    ) -> Result<Vec<FactChange>> {
        let mut effective = Vec::with_capacity(changes.len());
        for change in changes {
            if facts.apply(&change) {
                effective.push(change);
            }
        }
        if effective.is_empty() {
            return Ok(effective);
        }

        if let Err(err) = self.adapter.apply(&effective, facts).await {
            for change in effective.iter().rev() {
                facts.apply(&change.inverse());
            }
            error!(
                backend = self.adapter.backend_name(),
                changes = effective.len(),
                error = %err,
                "Policy write failed, in-memory change rolled back"
            );
            return Err(err);
        }

        debug!(
            backend = self.adapter.backend_name(),
            changes = effective.len(),
            "Policy change persisted"
        );
        Ok(effective)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::adapter::MemoryAdapter;

    async fn store() -> PolicyStore {
        PolicyStore::open(Arc::new(MemoryAdapter::new())).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_grant_reports_existing() {
        let store = store().await;
        let fact = GrantFact::new("owner", "t1", "project", "write");
        assert!(store.add_grant(fact.clone()).await.unwrap());
        assert!(!store.add_grant(fact.clone()).await.unwrap());
        assert_eq!(store.all_grants().await, vec![fact]);
    }

    #[tokio::test]
    async fn test_remove_absent_grant() {
        let store = store().await;
        let fact = GrantFact::new("owner", "t1", "project", "write");
        assert!(!store.remove_grant(fact).await.unwrap());
    }

    #[tokio::test]
    async fn test_validation_precedes_write() {
        let store = store().await;
        assert!(store
            .add_grant(GrantFact::new("", "t1", "project", "write"))
            .await
            .is_err());
        assert!(store
            .add_grouping(GroupingFact::new("u1", "", "t1"))
            .await
            .is_err());
        assert_eq!(store.grant_count().await, 0);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = PolicyStore::open(adapter.clone()).await.unwrap();
        store
            .add_grant(GrantFact::new("owner", "t1", "project", "write"))
            .await
            .unwrap();
        store.save().await.unwrap();

        let reopened = PolicyStore::open(adapter).await.unwrap();
        assert_eq!(reopened.grant_count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_filtered() {
        let store = store().await;
        store
            .add_grants(vec![
                GrantFact::new("owner", "t1", "project", "write"),
                GrantFact::new("owner", "t1", "project", "read"),
                GrantFact::new("owner", "t2", "project", "read"),
                GrantFact::new("viewer", "t1", "project", "read"),
            ])
            .await
            .unwrap();
        store
            .add_grouping(GroupingFact::new("u1", "owner", "t1"))
            .await
            .unwrap();
        store
            .add_grouping(GroupingFact::new("u2", "owner", "t2"))
            .await
            .unwrap();

        assert_eq!(store.remove_filtered_grants(Some("owner"), Some("t1")).await.unwrap(), 2);
        assert_eq!(store.grant_count().await, 2);
        assert_eq!(store.remove_filtered_groupings("owner", None).await.unwrap(), 2);
        assert!(store.all_groupings().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_role_facts_and_revert() {
        let store = store().await;
        store
            .add_grants(vec![
                GrantFact::new("qa", "t1", "suite", "run"),
                GrantFact::new("qa", "t2", "suite", "run"),
            ])
            .await
            .unwrap();
        store
            .add_groupings(vec![
                GroupingFact::new("u1", "qa", "t1"),
                GroupingFact::new("u2", "qa", "t1"),
                GroupingFact::new("u1", "qa", "t1"),
            ])
            .await
            .unwrap();
        assert_eq!(store.all_groupings().await.len(), 2);

        let removed = store.remove_role_facts("qa", "t1").await.unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(store.all_grants().await, vec![GrantFact::new("qa", "t2", "suite", "run")]);
        assert!(store.all_groupings().await.is_empty());

        assert_eq!(store.revert(&removed).await.unwrap(), 3);
        assert_eq!(store.grant_count().await, 2);
        assert_eq!(store.all_groupings().await.len(), 2);
    }
}
