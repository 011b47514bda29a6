//! Repository directory: which repositories exist and who owns them.
//!
//! The authoritative record belongs to the outer application; the core only
//! asks "what repository does this URL name". The in-memory implementation
//! is fed by the repository API.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use git_store::repo::RepoId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub id: RepoId,
    pub private: bool,
    pub default_branch: String,
}

#[async_trait]
pub trait RepoDirectory: Send + Sync {
    async fn resolve(&self, owner: &str, name: &str) -> Option<RepoInfo>;
    async fn register(&self, info: RepoInfo) -> anyhow::Result<()>;
    async fn unregister(&self, id: &RepoId) -> anyhow::Result<()>;
    async fn list_for_owner(&self, owner: &str) -> Vec<RepoInfo>;
}

#[derive(Default)]
pub struct MemoryRepoDirectory {
    repos: RwLock<HashMap<RepoId, RepoInfo>>,
}

impl MemoryRepoDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepoDirectory for MemoryRepoDirectory {
    async fn resolve(&self, owner: &str, name: &str) -> Option<RepoInfo> {
        let repos = self.repos.read().ok()?;
        repos.get(&RepoId::new(owner, name)).cloned()
    }

    async fn register(&self, info: RepoInfo) -> anyhow::Result<()> {
        let mut repos = self
            .repos
            .write()
            .map_err(|e| anyhow::anyhow!("directory lock poisoned: {e}"))?;
        repos.insert(info.id.clone(), info);
        Ok(())
    }

    async fn unregister(&self, id: &RepoId) -> anyhow::Result<()> {
        let mut repos = self
            .repos
            .write()
            .map_err(|e| anyhow::anyhow!("directory lock poisoned: {e}"))?;
        repos.remove(id);
        Ok(())
    }

    async fn list_for_owner(&self, owner: &str) -> Vec<RepoInfo> {
        let Ok(repos) = self.repos.read() else { return Vec::new() };
        let mut list: Vec<RepoInfo> = repos
            .values()
            .filter(|info| info.id.owner == owner)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.id.name.cmp(&b.id.name));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_resolve_unregister() {
        let directory = MemoryRepoDirectory::new();
        let info = RepoInfo {
            id: RepoId::new("alice", "proj"),
            private: false,
            default_branch: "main".into(),
        };
        directory.register(info.clone()).await.unwrap();
        assert_eq!(directory.resolve("alice", "proj").await, Some(info.clone()));
        assert_eq!(directory.resolve("alice", "other").await, None);
        assert_eq!(directory.list_for_owner("alice").await.len(), 1);
        directory.unregister(&info.id).await.unwrap();
        assert_eq!(directory.resolve("alice", "proj").await, None);
    }
}
