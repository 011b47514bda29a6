//! Repository storage backends.

pub mod s3;

use std::sync::Arc;

use git_store::store::{BlobStore, MemoryBlobStore};

use crate::config::Storage;

/// Build the blob store the configuration asks for.
pub fn build_store(storage: &Storage) -> anyhow::Result<Arc<dyn BlobStore>> {
    match storage {
        Storage::Memory => {
            tracing::info!("using in-memory repository storage");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
        Storage::S3(config) => {
            tracing::info!(
                "using S3 repository storage at {} bucket {}",
                config.endpoint,
                config.bucket
            );
            Ok(Arc::new(s3::S3BlobStore::new(config.clone())?))
        }
    }
}
