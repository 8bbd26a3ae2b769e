//! Session Store.
//!
//! Issues and validates opaque bearer tokens. `validate` is read-only
//! and never touches `last_activity` — only an explicit `touch()` call
//! or the periodic `sweep()` update it, so a client that never sends
//! a heartbeat still gets logged out after the TTL even if it keeps
//! making requests that merely read state.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::sync::RwLock;

use crate::config::SessionStoreConfig;
use crate::error::CoreError;
use crate::types::UserId;

/// A single logged-in session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Account this session belongs to.
    pub user_id: UserId,
    /// Monotonic creation time, for diagnostics only.
    pub created_at: Instant,
    /// Last time the session was touched, used for TTL expiry.
    pub last_activity: Instant,
}

/// Session store, keyed by the hex token handed to the client at login.
pub struct SessionStore {
    config: SessionStoreConfig,
    sessions: RwLock<BTreeMap<String, Session>>,
}

impl SessionStore {
    /// Build an empty store.
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Issue a new session for `user_id`, sweeping expired entries first
    /// if the store is at capacity.
    pub async fn create(&self, user_id: UserId) -> Result<String, CoreError> {
        {
            let sessions = self.sessions.read().await;
            if sessions.len() >= self.config.capacity {
                drop(sessions);
                self.sweep().await;
            }
        }

        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.config.capacity {
            return Err(CoreError::CapacityExceeded);
        }

        let token = generate_token();
        let now = Instant::now();
        sessions.insert(
            token.clone(),
            Session {
                user_id,
                created_at: now,
                last_activity: now,
            },
        );
        Ok(token)
    }

    /// Look up the account behind `token`. Does not update activity.
    pub async fn validate(&self, token: &str) -> Result<UserId, CoreError> {
        let sessions = self.sessions.read().await;
        match sessions.get(token) {
            Some(session) if session.last_activity.elapsed() < self.config.ttl => {
                Ok(session.user_id)
            }
            _ => Err(CoreError::InvalidToken),
        }
    }

    /// Explicitly refresh a session's activity timestamp.
    pub async fn touch(&self, token: &str) -> Result<(), CoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(token) {
            Some(session) => {
                session.last_activity = Instant::now();
                Ok(())
            }
            None => Err(CoreError::InvalidToken),
        }
    }

    /// Invalidate a session immediately (logout).
    pub async fn destroy(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }

    /// Drop every session whose TTL has elapsed. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let ttl = self.config.ttl;
        let before = sessions.len();
        sessions.retain(|_, session| session.last_activity.elapsed() < ttl);
        before - sessions.len()
    }

    /// Number of currently live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(SessionStoreConfig {
            capacity: 4,
            ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn create_and_validate_round_trip() {
        let store = store();
        let user_id = UserId::new_v4();
        let token = store.create(user_id).await.unwrap();
        assert_eq!(token.len(), 64);
        assert_eq!(store.validate(&token).await.unwrap(), user_id);
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let store = store();
        assert!(matches!(
            store.validate("deadbeef").await,
            Err(CoreError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn destroy_invalidates_immediately() {
        let store = store();
        let token = store.create(UserId::new_v4()).await.unwrap();
        store.destroy(&token).await;
        assert!(store.validate(&token).await.is_err());
    }

    #[tokio::test]
    async fn capacity_is_enforced_after_sweep_fails_to_free_room() {
        let store = store();
        for _ in 0..4 {
            store.create(UserId::new_v4()).await.unwrap();
        }
        let result = store.create(UserId::new_v4()).await;
        assert!(matches!(result, Err(CoreError::CapacityExceeded)));
    }

    #[tokio::test]
    async fn two_tokens_for_same_user_are_distinct() {
        let store = store();
        let user_id = UserId::new_v4();
        let a = store.create(user_id).await.unwrap();
        let b = store.create(user_id).await.unwrap();
        assert_ne!(a, b);
    }
}
