//! Fingerprint-keyed JSON cache with per-kind TTLs and branch-scoped
//! invalidation.
//!
//! Keys are `<app>:<kind>:<owner>:<repo>[:<branch>[:<extra>]]`. Empty
//! results are never cached: a repository with no commits yet must not have
//! its emptiness pinned until the TTL runs out.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{GitError, Result};
use crate::repo::RepoId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Branches,
    Commits,
    CommitCount,
    Trees,
    Files,
    Refs,
    Sessions,
    GitObject,
}

impl CacheKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheKind::Branches => "branches",
            CacheKind::Commits => "commits",
            CacheKind::CommitCount => "commit-count",
            CacheKind::Trees => "trees",
            CacheKind::Files => "files",
            CacheKind::Refs => "refs",
            CacheKind::Sessions => "sessions",
            CacheKind::GitObject => "gitObject",
        }
    }

    pub fn ttl(self) -> Duration {
        match self {
            CacheKind::Branches => Duration::from_secs(5 * 60),
            CacheKind::Commits => Duration::from_secs(10 * 60),
            CacheKind::CommitCount => Duration::from_secs(10 * 60),
            CacheKind::Trees => Duration::from_secs(30 * 60),
            CacheKind::Files => Duration::from_secs(60 * 60),
            CacheKind::Refs => Duration::from_secs(5 * 60),
            CacheKind::Sessions => Duration::from_secs(60 * 60),
            CacheKind::GitObject => Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Single-key atomic operations against a shared cache store.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (Instant, String)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err<E: std::fmt::Display>(err: E) -> GitError {
        GitError::transport(format!("cache lock poisoned: {err}"))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(Self::lock_err)?;
        Ok(entries
            .get(key)
            .filter(|(expires, _)| *expires > now)
            .map(|(_, value)| value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().map_err(Self::lock_err)?;
        entries.insert(key.to_string(), (Instant::now() + ttl, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(Self::lock_err)?;
        entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(Self::lock_err)?;
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

/// Typed facade binding an application namespace to the raw cache.
#[derive(Clone)]
pub struct RepoCache {
    cache: std::sync::Arc<dyn Cache>,
    app: String,
}

impl RepoCache {
    pub fn new(cache: std::sync::Arc<dyn Cache>, app: impl Into<String>) -> Self {
        Self { cache, app: app.into() }
    }

    pub fn key(
        &self,
        kind: CacheKind,
        repo: &RepoId,
        branch: Option<&str>,
        extra: Option<&str>,
    ) -> String {
        let mut key = format!("{}:{}:{}:{}", self.app, kind.as_str(), repo.owner, repo.name);
        if let Some(branch) = branch {
            key.push(':');
            key.push_str(branch);
        }
        if let Some(extra) = extra {
            key.push(':');
            key.push_str(extra);
        }
        key
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::debug!("cache read {key}: {err}");
                None
            }
        }
    }

    /// Store a JSON payload under the kind's TTL. Failures are logged, not
    /// propagated: the cache is best-effort.
    pub async fn put_json<T: Serialize>(&self, kind: CacheKind, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => {
                if let Err(err) = self.cache.set(key, raw, kind.ttl()).await {
                    tracing::debug!("cache write {key}: {err}");
                }
            }
            Err(err) => tracing::debug!("cache encode {key}: {err}"),
        }
    }

    /// Like [`put_json`](Self::put_json) but skips empty collections, so
    /// negative results never pin emptiness.
    pub async fn put_list<T: Serialize>(&self, kind: CacheKind, key: &str, list: &[T]) {
        if !list.is_empty() {
            self.put_json(kind, key, &list).await;
        }
    }

    /// Delete a key and everything scoped under it. The `:` guard keeps
    /// `main` from sweeping `main-2`.
    async fn delete_scope(&self, key: &str) {
        if let Err(err) = self.cache.delete(key).await {
            tracing::warn!("cache invalidation {key}: {err}");
        }
        if let Err(err) = self.cache.delete_prefix(&format!("{key}:")).await {
            tracing::warn!("cache invalidation {key}: {err}");
        }
    }

    /// Drop everything the branch influences: its commits/trees/files, the
    /// branch list, and its commit count.
    pub async fn invalidate_branch(&self, repo: &RepoId, branch: &str) {
        for kind in [CacheKind::Commits, CacheKind::Trees, CacheKind::Files] {
            self.delete_scope(&self.key(kind, repo, Some(branch), None)).await;
        }
        for key in [
            self.key(CacheKind::Branches, repo, None, None),
            self.key(CacheKind::CommitCount, repo, Some(branch), None),
        ] {
            if let Err(err) = self.cache.delete(&key).await {
                tracing::warn!("cache invalidation {key}: {err}");
            }
        }
    }

    /// Drop every cached entry for the repository, any kind, any branch.
    pub async fn invalidate_repo(&self, repo: &RepoId) {
        for kind in [
            CacheKind::Branches,
            CacheKind::Commits,
            CacheKind::CommitCount,
            CacheKind::Trees,
            CacheKind::Files,
            CacheKind::Refs,
            CacheKind::Sessions,
            CacheKind::GitObject,
        ] {
            self.delete_scope(&self.key(kind, repo, None, None)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn repo_cache() -> RepoCache {
        RepoCache::new(Arc::new(MemoryCache::new()), "skiff")
    }

    #[test]
    fn keys_are_fingerprinted() {
        let cache = repo_cache();
        let repo = RepoId::new("alice", "proj");
        assert_eq!(
            cache.key(CacheKind::Branches, &repo, None, None),
            "skiff:branches:alice:proj"
        );
        assert_eq!(
            cache.key(CacheKind::Commits, &repo, Some("main"), Some("page-0")),
            "skiff:commits:alice:proj:main:page-0"
        );
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::from_millis(20)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_lists_are_not_cached() {
        let cache = repo_cache();
        let repo = RepoId::new("alice", "proj");
        let key = cache.key(CacheKind::Commits, &repo, Some("main"), None);
        let empty: Vec<String> = vec![];
        cache.put_list(CacheKind::Commits, &key, &empty).await;
        assert!(cache.get_json::<Vec<String>>(&key).await.is_none());

        cache.put_list(CacheKind::Commits, &key, &["c1".to_string()]).await;
        assert_eq!(
            cache.get_json::<Vec<String>>(&key).await,
            Some(vec!["c1".to_string()])
        );
    }

    #[tokio::test]
    async fn branch_invalidation_is_scoped() {
        let cache = repo_cache();
        let repo = RepoId::new("alice", "proj");
        let commits_main = cache.key(CacheKind::Commits, &repo, Some("main"), Some("p0"));
        let commits_dev = cache.key(CacheKind::Commits, &repo, Some("dev"), Some("p0"));
        let branches = cache.key(CacheKind::Branches, &repo, None, None);
        cache.put_json(CacheKind::Commits, &commits_main, &vec!["a"]).await;
        cache.put_json(CacheKind::Commits, &commits_dev, &vec!["b"]).await;
        cache.put_json(CacheKind::Branches, &branches, &vec!["main", "dev"]).await;

        cache.invalidate_branch(&repo, "main").await;
        assert!(cache.get_json::<Vec<String>>(&commits_main).await.is_none());
        assert!(cache.get_json::<Vec<String>>(&branches).await.is_none());
        assert!(cache.get_json::<Vec<String>>(&commits_dev).await.is_some());
    }

    #[tokio::test]
    async fn repo_invalidation_sweeps_all_kinds() {
        let cache = repo_cache();
        let repo = RepoId::new("alice", "proj");
        let other = RepoId::new("bob", "proj");
        let mine = cache.key(CacheKind::Files, &repo, Some("main"), Some("README"));
        let theirs = cache.key(CacheKind::Files, &other, Some("main"), Some("README"));
        cache.put_json(CacheKind::Files, &mine, &"data").await;
        cache.put_json(CacheKind::Files, &theirs, &"data").await;

        cache.invalidate_repo(&repo).await;
        assert!(cache.get_json::<String>(&mine).await.is_none());
        assert!(cache.get_json::<String>(&theirs).await.is_some());
    }
}
