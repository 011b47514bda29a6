//! In-process notification hub.
//!
//! The one process-wide mutable collaborator: a guarded map of user id to
//! live subscriber channels. Pushes and merges broadcast repository events;
//! a subscriber that went away mid-broadcast is logged and dropped. The
//! wire protocol carrying these events out of the process is someone
//! else's problem.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use git_store::repo::RepoId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoEvent {
    pub repo: RepoId,
    pub branch: Option<String>,
    pub kind: RepoEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoEventKind {
    Pushed,
    Merged,
    Deleted,
}

const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Default, Clone)]
pub struct NotifyHub {
    subscribers: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<RepoEvent>>>>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for a user; the receiver ends the subscription
    /// by being dropped.
    pub fn subscribe(&self, user: &str) -> mpsc::Receiver<RepoEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.entry(user.to_string()).or_default().push(tx);
        }
        rx
    }

    /// Deliver an event to every live subscriber of every user. Stale
    /// handles are pruned as they are found.
    pub fn broadcast(&self, event: &RepoEvent) {
        let Ok(mut subscribers) = self.subscribers.write() else {
            tracing::warn!("notify hub lock poisoned; dropping event");
            return;
        };
        subscribers.retain(|user, channels| {
            channels.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!("subscriber {user} lagging; event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("subscriber {user} went away");
                    false
                }
            });
            !channels.is_empty()
        });
    }
}
