//! Repository handle: identity, lifecycle, and loose-object access.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::{GitError, Result};
use crate::fs::RepoFs;
use crate::object::{Commit, ObjectType, Oid, Tree, decode_loose, encode_loose, oid_for};
use crate::refs::Refs;
use crate::store::BlobStore;

/// Logical repository key. Owns the blob-store prefix
/// `repos/<owner>/<name>/` exclusively; objects are never shared across
/// repositories (cross-repo merges copy).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self { owner: owner.into(), name: name.into() }
    }

    pub fn prefix(&self) -> String {
        format!("repos/{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Clone)]
pub struct Repository {
    id: RepoId,
    fs: RepoFs,
    refs: Refs,
}

impl Repository {
    pub fn open(store: Arc<dyn BlobStore>, id: RepoId) -> Self {
        let fs = RepoFs::new(store, id.prefix());
        let refs = Refs::new(fs.clone());
        Self { id, fs, refs }
    }

    /// Create the bare layout: `HEAD`, `config`, `description`; no refs.
    pub async fn init(
        store: Arc<dyn BlobStore>,
        id: RepoId,
        default_branch: &str,
        description: &str,
    ) -> Result<Self> {
        let repo = Self::open(store, id);
        repo.fs
            .write_file("HEAD", Bytes::from(format!("ref: refs/heads/{default_branch}\n")))
            .await?;
        repo.fs
            .write_file(
                "config",
                Bytes::from_static(
                    b"[core]\n\trepositoryformatversion = 0\n\tfilemode = false\n\tbare = true\n",
                ),
            )
            .await?;
        repo.fs
            .write_file("description", Bytes::from(description.to_string()))
            .await?;
        Ok(repo)
    }

    pub async fn exists(&self) -> Result<bool> {
        self.fs.exists("HEAD").await
    }

    /// Drop the whole prefix. Cache invalidation is the caller's job.
    pub async fn delete(&self) -> Result<()> {
        self.fs.store().delete_prefix(&format!("{}/", self.fs.prefix())).await
    }

    pub fn id(&self) -> &RepoId {
        &self.id
    }

    pub fn fs(&self) -> &RepoFs {
        &self.fs
    }

    pub fn refs(&self) -> &Refs {
        &self.refs
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        self.fs.store()
    }

    pub async fn has_object(&self, oid: Oid) -> Result<bool> {
        self.fs.exists(&oid.loose_key()).await
    }

    pub async fn read_object(&self, oid: Oid) -> Result<(ObjectType, Bytes)> {
        let raw = self
            .fs
            .read_file(&oid.loose_key())
            .await
            .map_err(|err| match err {
                GitError::NotFound(_) => GitError::not_found(format!("object {oid}")),
                other => other,
            })?;
        decode_loose(&raw)
    }

    pub async fn read_commit(&self, oid: Oid) -> Result<Commit> {
        let (kind, payload) = self.read_object(oid).await?;
        if kind != ObjectType::Commit {
            return Err(GitError::malformed(format!("{oid} is a {}, expected commit", kind.as_str())));
        }
        Commit::parse(&payload)
    }

    pub async fn read_tree(&self, oid: Oid) -> Result<Tree> {
        let (kind, payload) = self.read_object(oid).await?;
        if kind != ObjectType::Tree {
            return Err(GitError::malformed(format!("{oid} is a {}, expected tree", kind.as_str())));
        }
        Tree::parse(&payload)
    }

    pub async fn read_blob(&self, oid: Oid) -> Result<Bytes> {
        let (kind, payload) = self.read_object(oid).await?;
        if kind != ObjectType::Blob {
            return Err(GitError::malformed(format!("{oid} is a {}, expected blob", kind.as_str())));
        }
        Ok(payload)
    }

    /// Store a payload as a loose object, returning its recomputed OID.
    pub async fn write_object(&self, kind: ObjectType, payload: &[u8]) -> Result<Oid> {
        let oid = oid_for(kind, payload);
        let encoded = encode_loose(kind, payload)?;
        self.fs.write_file(&oid.loose_key(), Bytes::from(encoded)).await?;
        Ok(oid)
    }

    pub async fn write_commit(&self, commit: &Commit) -> Result<Oid> {
        self.write_object(ObjectType::Commit, &commit.encode()).await
    }

    pub async fn write_tree(&self, tree: &Tree) -> Result<Oid> {
        self.write_object(ObjectType::Tree, &tree.encode()).await
    }

    /// Tree entry at a `/`-separated path under a root tree.
    pub async fn entry_at_path(
        &self,
        root: Oid,
        path: &str,
    ) -> Result<Option<crate::object::TreeEntry>> {
        let mut tree = self.read_tree(root).await?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Ok(None);
        }
        for (idx, segment) in segments.iter().enumerate() {
            let Some(entry) = tree.entry(segment).cloned() else {
                return Ok(None);
            };
            if idx == segments.len() - 1 {
                return Ok(Some(entry));
            }
            if !entry.is_tree() {
                return Ok(None);
            }
            tree = self.read_tree(entry.oid).await?;
        }
        Ok(None)
    }
}
