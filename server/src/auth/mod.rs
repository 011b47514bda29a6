//! Authentication: identity lookup and HTTP Basic credentials.
//!
//! The git endpoints accept either an ambient session user or HTTP Basic
//! `username-or-email:password`. Identities live behind a trait; the
//! in-memory provider is seeded from configuration.

pub mod session;

pub use session::{Session, SessionManager};

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::config::UserEntry;

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub email: String,
}

impl User {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self { username: username.into(), email: email.into() }
    }
}

/// External identity provider consulted for Basic credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify an email + password pair.
    async fn verify(&self, email: &str, password: &str) -> Option<User>;

    /// Resolve a username to the email the provider knows it by.
    async fn email_for_username(&self, username: &str) -> Option<String>;
}

/// Guarded-map provider seeded from the `users` config section.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    by_email: RwLock<HashMap<String, (User, String)>>,
}

impl MemoryIdentityProvider {
    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let mut by_email = HashMap::new();
        for entry in entries {
            by_email.insert(
                entry.email.clone(),
                (User::new(&entry.username, &entry.email), entry.password.clone()),
            );
        }
        Self { by_email: RwLock::new(by_email) }
    }

    pub fn add(&self, entry: &UserEntry) {
        if let Ok(mut map) = self.by_email.write() {
            map.insert(
                entry.email.clone(),
                (User::new(&entry.username, &entry.email), entry.password.clone()),
            );
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn verify(&self, email: &str, password: &str) -> Option<User> {
        let map = self.by_email.read().ok()?;
        let (user, stored) = map.get(email)?;
        (stored == password).then(|| user.clone())
    }

    async fn email_for_username(&self, username: &str) -> Option<String> {
        let map = self.by_email.read().ok()?;
        map.values()
            .find(|(user, _)| user.username == username)
            .map(|(user, _)| user.email.clone())
    }
}

/// Decode an `Authorization: Basic ...` header into `(login, password)`.
pub fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (login, password) = text.split_once(':')?;
    Some((login.to_string(), password.to_string()))
}

/// Verify Basic credentials, resolving a bare username to its email first.
pub async fn verify_basic(
    identity: &dyn IdentityProvider,
    login: &str,
    password: &str,
) -> Option<User> {
    let email = if login.contains('@') {
        login.to_string()
    } else {
        identity.email_for_username(login).await?
    };
    identity.verify(&email, password).await
}
