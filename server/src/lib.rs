//! Skiff server library: HTTP surface over object-store-backed Git.

pub mod api;
pub mod auth;
pub mod config;
pub mod directory;
pub mod git_http;
pub mod notify;
pub mod storage;
pub mod validation;

use std::sync::Arc;

use git_store::cache::{MemoryCache, RepoCache};
use git_store::protect::MemoryProtectionStore;

use api::AppState;
use auth::{MemoryIdentityProvider, SessionManager};
use directory::MemoryRepoDirectory;
use notify::NotifyHub;

/// Cache key namespace and Basic realm.
pub const APP_NAME: &str = "skiff";

/// Assemble the application state from configuration.
pub fn build_state(config: &config::Config) -> anyhow::Result<AppState> {
    let store = storage::build_store(&config.storage)?;
    Ok(AppState {
        store,
        directory: Arc::new(MemoryRepoDirectory::new()),
        identity: Arc::new(MemoryIdentityProvider::from_entries(&config.users)),
        sessions: Arc::new(SessionManager::new()),
        protections: Arc::new(MemoryProtectionStore::new()),
        cache: RepoCache::new(Arc::new(MemoryCache::new()), APP_NAME),
        hub: NotifyHub::new(),
    })
}
