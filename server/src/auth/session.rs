//! Session management.
//!
//! In-memory session storage for authenticated users; multiple users can be
//! logged in simultaneously. Sessions ride on the `x-skiff-session` header.

use super::User;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// An active session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user: User,
}

pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self { sessions: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn create_session(&self, user: User) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let session = Session { id: session_id.clone(), user };
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| anyhow::anyhow!("failed to acquire session lock: {e}"))?;
        sessions.insert(session_id.clone(), session);
        Ok(session_id)
    }

    pub fn get_user(&self, session_id: &str) -> Result<Option<User>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| anyhow::anyhow!("failed to acquire session lock: {e}"))?;
        Ok(sessions.get(session_id).map(|s| s.user.clone()))
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| anyhow::anyhow!("failed to acquire session lock: {e}"))?;
        sessions.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_lookup_delete() {
        let manager = SessionManager::new();
        let user = User::new("alice", "alice@example.com");
        let id = manager.create_session(user.clone()).unwrap();
        assert_eq!(manager.get_user(&id).unwrap(), Some(user));
        manager.delete_session(&id).unwrap();
        assert_eq!(manager.get_user(&id).unwrap(), None);
    }
}
