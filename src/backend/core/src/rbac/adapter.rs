//! Persistence adapters for the policy store.
//!
//! The [`PolicyStore`](super::store::PolicyStore) owns the in-memory fact
//! set; an adapter owns the durable copy. Adapters receive every mutation
//! before the store reports success, so a caller that observes `added=true`
//! is guaranteed the fact is durable.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::models::{FactChange, FactSet, FactSnapshot};
use crate::error::{DepotError, Result};

/// Durable backend for grant and grouping facts.
#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    /// Read every persisted fact.
    async fn load(&self) -> Result<FactSnapshot>;

    /// Replace the persisted facts with `snapshot`.
    async fn save(&self, snapshot: &FactSnapshot) -> Result<()>;

    /// Persist `changes`. `facts` is the in-memory set with the changes
    /// already applied; snapshot-style adapters write it whole.
    async fn apply(&self, changes: &[FactChange], facts: &FactSet) -> Result<()>;

    /// Whether facts survive a process restart.
    fn is_durable(&self) -> bool;

    fn backend_name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Memory Adapter
// ═══════════════════════════════════════════════════════════════════════════════

/// Keeps the "durable" copy in process memory.
///
/// Used by tests and local development. `save`/`load` still round-trip, so
/// the store's persistence boundary behaves the same as with a real backend.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    facts: Mutex<FactSet>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with pre-existing persisted facts.
    pub fn with_snapshot(snapshot: FactSnapshot) -> Self {
        Self {
            facts: Mutex::new(FactSet::from_snapshot(snapshot)),
        }
    }
}

#[async_trait]
impl PolicyAdapter for MemoryAdapter {
    async fn load(&self) -> Result<FactSnapshot> {
        Ok(self.facts.lock().snapshot())
    }

    async fn save(&self, snapshot: &FactSnapshot) -> Result<()> {
        *self.facts.lock() = FactSet::from_snapshot(snapshot.clone());
        Ok(())
    }

    async fn apply(&self, changes: &[FactChange], _facts: &FactSet) -> Result<()> {
        let mut facts = self.facts.lock();
        for change in changes {
            facts.apply(change);
        }
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File Adapter
// ═══════════════════════════════════════════════════════════════════════════════

/// Stores facts as a JSON snapshot on local disk.
///
/// Each write goes to a sibling temp file that is then renamed over the
/// target, so a crash mid-write never leaves a truncated policy file.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "policy.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_snapshot(&self, snapshot: &FactSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DepotError::policy_write(format!("create {}: {}", parent.display(), e))
                        .with_source(e)
                })?;
            }
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            DepotError::policy_write(format!("write {}: {}", tmp.display(), e)).with_source(e)
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            DepotError::policy_write(format!("rename to {}: {}", self.path.display(), e))
                .with_source(e)
        })?;

        debug!(
            path = %self.path.display(),
            grants = snapshot.grants.len(),
            groupings = snapshot.groupings.len(),
            "Policy snapshot written"
        );
        Ok(())
    }
}

#[async_trait]
impl PolicyAdapter for FileAdapter {
    async fn load(&self) -> Result<FactSnapshot> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                DepotError::policy_load(format!("parse {}: {}", self.path.display(), e))
                    .with_source(e)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FactSnapshot::default()),
            Err(e) => Err(DepotError::policy_load(format!(
                "read {}: {}",
                self.path.display(),
                e
            ))
            .with_source(e)),
        }
    }

    async fn save(&self, snapshot: &FactSnapshot) -> Result<()> {
        self.write_snapshot(snapshot).await
    }

    async fn apply(&self, _changes: &[FactChange], facts: &FactSet) -> Result<()> {
        self.write_snapshot(&facts.snapshot()).await
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::models::{GrantFact, GroupingFact};
    use tempfile::TempDir;

    fn sample() -> FactSnapshot {
        FactSnapshot {
            grants: vec![GrantFact::new("owner", "t1", "project", "write")],
            groupings: vec![GroupingFact::new("u1", "owner", "t1")],
        }
    }

    #[tokio::test]
    async fn test_file_adapter_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let adapter = FileAdapter::new(tmp.path().join("policy.json"));
        let loaded = adapter.load().await.unwrap();
        assert!(loaded.grants.is_empty());
        assert!(loaded.groupings.is_empty());
    }

    #[tokio::test]
    async fn test_file_adapter_round_trip() {
        let tmp = TempDir::new().unwrap();
        let adapter = FileAdapter::new(tmp.path().join("nested").join("policy.json"));
        adapter.save(&sample()).await.unwrap();

        let loaded = adapter.load().await.unwrap();
        assert_eq!(loaded, sample());
        assert!(!adapter.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_adapter_rejects_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = FileAdapter::new(&path).load().await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::PolicyStoreLoadFailed);
    }

    #[tokio::test]
    async fn test_memory_adapter_applies_changes() {
        let adapter = MemoryAdapter::new();
        let grant = GrantFact::new("owner", "t1", "project", "write");
        adapter
            .apply(&[FactChange::AddGrant(grant.clone())], &FactSet::new())
            .await
            .unwrap();
        assert_eq!(adapter.load().await.unwrap().grants, vec![grant]);
    }
}
