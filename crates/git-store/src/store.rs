//! Blob store facade.
//!
//! Every repository lives under a hierarchical key prefix in an object
//! store. This trait is the only storage capability the rest of the crate
//! sees; the server wires in an S3-compatible implementation, tests and the
//! in-memory mode use [`MemoryBlobStore`].

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::{GitError, Result};

/// Key/value operations over the object store.
///
/// Guarantees required of implementations: operations on distinct keys are
/// independent, a single-object `put` is atomic, and `list` returns every
/// key whose full name begins with the prefix (paginating to completion).
/// Errors are either not-found (the `Ok(None)` / `Ok(false)` shapes below)
/// or transport failures, which propagate unchanged.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value, replacing any previous one.
    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<()>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Existence check without fetching the body.
    async fn head(&self, key: &str) -> Result<bool>;

    /// All keys beginning with `prefix`, in store order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Copy every key under `src` to the same suffix under `dst`.
    async fn copy_prefix(&self, src: &str, dst: &str) -> Result<()> {
        for key in self.list(src).await? {
            let suffix = &key[src.len()..];
            let data = self
                .get(&key)
                .await?
                .ok_or_else(|| GitError::transport(format!("key vanished during copy: {key}")))?;
            self.put(&format!("{dst}{suffix}"), data, None).await?;
        }
        Ok(())
    }

    /// Delete every key under `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        for key in self.list(prefix).await? {
            self.delete(&key).await?;
        }
        Ok(())
    }
}

/// In-memory store backed by a sorted map. Listing order is therefore
/// deterministic, which the ref advertisement relies on in tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn BlobStore> {
        Arc::new(Self::new())
    }

    fn lock_err<E: std::fmt::Display>(err: E) -> GitError {
        GitError::transport(format!("blob store lock poisoned: {err}"))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let entries = self.entries.read().map_err(Self::lock_err)?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: Option<&str>) -> Result<()> {
        let mut entries = self.entries.write().map_err(Self::lock_err)?;
        entries.insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(Self::lock_err)?;
        entries.remove(key);
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<bool> {
        let entries = self.entries.read().map_err(Self::lock_err)?;
        Ok(entries.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(Self::lock_err)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryBlobStore::new();
        store
            .put("repos/a/b/HEAD", Bytes::from_static(b"ref: refs/heads/main\n"), None)
            .await
            .unwrap();
        assert!(store.head("repos/a/b/HEAD").await.unwrap());
        assert_eq!(
            store.get("repos/a/b/HEAD").await.unwrap().unwrap().as_ref(),
            b"ref: refs/heads/main\n"
        );
        store.delete("repos/a/b/HEAD").await.unwrap();
        assert!(!store.head("repos/a/b/HEAD").await.unwrap());
        assert!(store.get("repos/a/b/HEAD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_prefix_scoped_and_sorted() {
        let store = MemoryBlobStore::new();
        for key in ["r/a/refs/heads/dev", "r/a/refs/heads/main", "r/a/HEAD", "r/b/HEAD"] {
            store.put(key, Bytes::from_static(b"x"), None).await.unwrap();
        }
        let keys = store.list("r/a/refs/heads/").await.unwrap();
        assert_eq!(keys, vec!["r/a/refs/heads/dev", "r/a/refs/heads/main"]);
    }

    #[tokio::test]
    async fn copy_and_delete_prefix() {
        let store = MemoryBlobStore::new();
        store.put("src/x/1", Bytes::from_static(b"1"), None).await.unwrap();
        store.put("src/x/2", Bytes::from_static(b"2"), None).await.unwrap();
        store.copy_prefix("src/", "dst/").await.unwrap();
        assert_eq!(store.get("dst/x/2").await.unwrap().unwrap().as_ref(), b"2");
        store.delete_prefix("src/").await.unwrap();
        assert!(store.list("src/").await.unwrap().is_empty());
    }
}
