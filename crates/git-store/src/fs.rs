//! Repository filesystem adapter.
//!
//! The Git machinery expects a file-shaped view of a bare repository. This
//! adapter maps `.git/...` paths onto blob-store keys under the repository
//! prefix and synthesizes directory listings and stat by prefix scan. It is
//! the sole coupling point between Git semantics and the storage backend.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::errors::{GitError, Result};
use crate::store::BlobStore;

#[derive(Clone)]
pub struct RepoFs {
    store: Arc<dyn BlobStore>,
    prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStat {
    File { size: u64, modified: SystemTime },
    Directory { modified: SystemTime },
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        matches!(self, FileStat::Directory { .. })
    }
}

impl RepoFs {
    /// `prefix` is the repository's blob-store prefix without a trailing
    /// slash, e.g. `repos/alice/project`.
    pub fn new(store: Arc<dyn BlobStore>, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        while prefix.ends_with('/') {
            prefix.pop();
        }
        Self { store, prefix }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Map a git-facing path to its blob-store key.
    ///
    /// Strips a leading `/`, drops a `.git` prefix (bare layout), collapses
    /// runs of `/`, and never produces a trailing `/`.
    pub fn key_for(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        let path = if path == ".git" {
            ""
        } else {
            path.strip_prefix(".git/").unwrap_or(path)
        };
        let mut key = self.prefix.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            key.push('/');
            key.push_str(segment);
        }
        key
    }

    pub async fn read_file(&self, path: &str) -> Result<Bytes> {
        let key = self.key_for(path);
        self.store
            .get(&key)
            .await?
            .ok_or_else(|| GitError::not_found(key))
    }

    pub async fn write_file(&self, path: &str, data: Bytes) -> Result<()> {
        self.store.put(&self.key_for(path), data, None).await
    }

    pub async fn unlink(&self, path: &str) -> Result<()> {
        self.store.delete(&self.key_for(path)).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.store.head(&self.key_for(path)).await
    }

    /// Unique first path components under `path`.
    pub async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let mut dir = self.key_for(path);
        dir.push('/');
        let mut names: Vec<String> = Vec::new();
        for key in self.store.list(&dir).await? {
            let rest = &key[dir.len()..];
            let first = rest.split('/').next().unwrap_or(rest);
            if !first.is_empty() && names.last().map(String::as_str) != Some(first) {
                names.push(first.to_string());
            }
        }
        names.dedup();
        Ok(names)
    }

    /// Directory when the key is the repository root or has children; file
    /// when the key itself exists. Timestamps are synthetic wall-clock: the
    /// store records none.
    pub async fn stat(&self, path: &str) -> Result<FileStat> {
        let key = self.key_for(path);
        let now = SystemTime::now();
        if key == self.prefix {
            return Ok(FileStat::Directory { modified: now });
        }
        if let Some(data) = self.store.get(&key).await? {
            return Ok(FileStat::File { size: data.len() as u64, modified: now });
        }
        let children = self.store.list(&format!("{key}/")).await?;
        if !children.is_empty() {
            return Ok(FileStat::Directory { modified: now });
        }
        Err(GitError::not_found(key))
    }

    /// The store has no directories: creating one is a no-op.
    pub fn mkdir(&self, _path: &str) {}

    /// The store has no modes: chmod is a no-op.
    pub fn chmod(&self, _path: &str, _mode: u32) {}

    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let data = self.read_file(old).await?;
        self.write_file(new, data).await?;
        self.unlink(old).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;

    fn fs() -> RepoFs {
        RepoFs::new(MemoryBlobStore::shared(), "repos/alice/demo")
    }

    #[test]
    fn key_normalization() {
        let fs = fs();
        assert_eq!(fs.key_for("HEAD"), "repos/alice/demo/HEAD");
        assert_eq!(fs.key_for("/HEAD"), "repos/alice/demo/HEAD");
        assert_eq!(fs.key_for(".git/HEAD"), "repos/alice/demo/HEAD");
        assert_eq!(fs.key_for(".git"), "repos/alice/demo");
        assert_eq!(
            fs.key_for("objects//ab//cdef"),
            "repos/alice/demo/objects/ab/cdef"
        );
        assert_eq!(fs.key_for("refs/heads/"), "repos/alice/demo/refs/heads");
    }

    #[tokio::test]
    async fn readdir_returns_unique_first_components() {
        let fs = fs();
        for path in [
            "refs/heads/main",
            "refs/heads/dev",
            "refs/tags/v1",
            "refs/tags/v2",
        ] {
            fs.write_file(path, Bytes::from_static(b"x")).await.unwrap();
        }
        let mut names = fs.readdir("refs").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["heads", "tags"]);
    }

    #[tokio::test]
    async fn stat_distinguishes_files_and_directories() {
        let fs = fs();
        fs.write_file("refs/heads/main", Bytes::from_static(b"abc\n"))
            .await
            .unwrap();
        assert!(matches!(
            fs.stat("refs/heads/main").await.unwrap(),
            FileStat::File { size: 4, .. }
        ));
        assert!(fs.stat("refs/heads").await.unwrap().is_dir());
        assert!(fs.stat(".git").await.unwrap().is_dir());
        assert!(fs.stat("refs/heads/missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn rename_moves_content() {
        let fs = fs();
        fs.write_file("description", Bytes::from_static(b"demo"))
            .await
            .unwrap();
        fs.rename("description", "description.bak").await.unwrap();
        assert!(!fs.exists("description").await.unwrap());
        assert_eq!(
            fs.read_file("description.bak").await.unwrap().as_ref(),
            b"demo"
        );
    }
}
