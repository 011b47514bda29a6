//! Branch protection rules consumed by receive-pack.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{GitError, Result};
use crate::repo::RepoId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchProtection {
    #[serde(default)]
    pub prevent_direct_push: bool,
    #[serde(default)]
    pub prevent_force_push: bool,
    #[serde(default)]
    pub prevent_deletion: bool,
}

impl BranchProtection {
    pub fn is_empty(&self) -> bool {
        !self.prevent_direct_push && !self.prevent_force_push && !self.prevent_deletion
    }
}

/// Where receive-pack looks up the rules for a branch. The backing store
/// (SQL, config, ...) belongs to the outer application.
#[async_trait]
pub trait ProtectionStore: Send + Sync {
    async fn rules_for(&self, repo: &RepoId, branch: &str) -> Result<Option<BranchProtection>>;
}

/// Guarded-map implementation used by the server and tests.
#[derive(Default)]
pub struct MemoryProtectionStore {
    rules: RwLock<HashMap<(RepoId, String), BranchProtection>>,
}

impl MemoryProtectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, repo: RepoId, branch: &str, rules: BranchProtection) -> Result<()> {
        let mut map = self
            .rules
            .write()
            .map_err(|e| GitError::transport(format!("protection lock poisoned: {e}")))?;
        if rules.is_empty() {
            map.remove(&(repo, branch.to_string()));
        } else {
            map.insert((repo, branch.to_string()), rules);
        }
        Ok(())
    }

    pub fn get(&self, repo: &RepoId, branch: &str) -> Result<Option<BranchProtection>> {
        let map = self
            .rules
            .read()
            .map_err(|e| GitError::transport(format!("protection lock poisoned: {e}")))?;
        Ok(map.get(&(repo.clone(), branch.to_string())).cloned())
    }
}

#[async_trait]
impl ProtectionStore for MemoryProtectionStore {
    async fn rules_for(&self, repo: &RepoId, branch: &str) -> Result<Option<BranchProtection>> {
        self.get(repo, branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_and_clear() {
        let store = MemoryProtectionStore::new();
        let repo = RepoId::new("alice", "proj");
        let rules = BranchProtection { prevent_force_push: true, ..Default::default() };
        store.set(repo.clone(), "main", rules.clone()).unwrap();
        assert_eq!(store.rules_for(&repo, "main").await.unwrap(), Some(rules));
        assert_eq!(store.rules_for(&repo, "dev").await.unwrap(), None);

        store.set(repo.clone(), "main", BranchProtection::default()).unwrap();
        assert_eq!(store.rules_for(&repo, "main").await.unwrap(), None);
    }
}
