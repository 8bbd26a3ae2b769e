//! Presence Registry.
//!
//! Tracks which live connection, if any, speaks for each authenticated
//! user. A new login for a `user_id` that is already present supersedes
//! the old mapping: the previous connection is detached from presence
//! but is not forcibly closed, since it may still be mid-write or about
//! to disconnect on its own.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, RwLock};

use crate::protocol::Notification;
use crate::types::UserId;

/// Identifies a single TCP connection, independent of whether it has
/// authenticated yet. Assigned sequentially by the reactor.
pub type ConnectionId = u64;

struct Entry {
    user_id: Option<UserId>,
    sender: mpsc::Sender<Notification>,
}

/// `user_id -> Connection` presence table plus the raw connection table
/// it's built on.
#[derive(Default)]
pub struct PresenceRegistry {
    connections: RwLock<BTreeMap<ConnectionId, Entry>>,
    by_user: RwLock<BTreeMap<UserId, ConnectionId>>,
}

impl PresenceRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted, not-yet-authenticated connection.
    pub async fn register_connection(&self, id: ConnectionId, sender: mpsc::Sender<Notification>) {
        self.connections.write().await.insert(
            id,
            Entry {
                user_id: None,
                sender,
            },
        );
    }

    /// Associate `user_id` with `conn_id`, superseding any previous
    /// connection for that user without closing it.
    pub async fn attach_user(&self, conn_id: ConnectionId, user_id: UserId) {
        let mut connections = self.connections.write().await;
        if let Some(entry) = connections.get_mut(&conn_id) {
            entry.user_id = Some(user_id);
        }
        drop(connections);
        self.by_user.write().await.insert(user_id, conn_id);
    }

    /// Remove a connection entirely (socket closed).
    pub async fn remove_connection(&self, conn_id: ConnectionId) {
        let user_id = {
            let mut connections = self.connections.write().await;
            connections.remove(&conn_id).and_then(|e| e.user_id)
        };
        if let Some(user_id) = user_id {
            let mut by_user = self.by_user.write().await;
            // Only clear the mapping if it still points at this connection;
            // a newer login may have already superseded it.
            if by_user.get(&user_id) == Some(&conn_id) {
                by_user.remove(&user_id);
            }
        }
    }

    /// Send a notification to the connection currently representing `user_id`.
    pub async fn send_to_user(&self, user_id: UserId, notification: Notification) -> bool {
        let conn_id = match self.by_user.read().await.get(&user_id).copied() {
            Some(id) => id,
            None => return false,
        };
        self.send_to_connection(conn_id, notification).await
    }

    /// Send a notification directly to a connection, authenticated or not.
    pub async fn send_to_connection(&self, conn_id: ConnectionId, notification: Notification) -> bool {
        let sender = self
            .connections
            .read()
            .await
            .get(&conn_id)
            .map(|e| e.sender.clone());
        match sender {
            Some(sender) => sender.send(notification).await.is_ok(),
            None => false,
        }
    }

    /// Send the same notification to every user in `users`, skipping any
    /// that are not currently connected.
    pub async fn broadcast_to_ready(&self, users: &[UserId], notification: Notification) {
        for &user_id in users {
            self.send_to_user(user_id, notification.clone()).await;
        }
    }

    /// Send the same notification to every user participating in a match
    /// (players and spectators alike).
    pub async fn broadcast_to_match(&self, users: &[UserId], notification: Notification) {
        for &user_id in users {
            self.send_to_user(user_id, notification.clone()).await;
        }
    }

    /// Whether `user_id` currently has a live connection.
    pub async fn is_connected(&self, user_id: UserId) -> bool {
        self.by_user.read().await.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Notification;

    fn chat_notification() -> Notification {
        Notification::ChatMessage {
            from: "system".into(),
            message: "hello".into(),
        }
    }

    #[tokio::test]
    async fn attach_and_send_round_trip() {
        let registry = PresenceRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.register_connection(1, tx).await;
        let user_id = UserId::new_v4();
        registry.attach_user(1, user_id).await;

        assert!(registry.is_connected(user_id).await);
        assert!(registry.send_to_user(user_id, chat_notification()).await);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn login_supersedes_without_closing_old_connection() {
        let registry = PresenceRegistry::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        registry.register_connection(1, tx1).await;
        registry.register_connection(2, tx2).await;

        let user_id = UserId::new_v4();
        registry.attach_user(1, user_id).await;
        registry.attach_user(2, user_id).await;

        // Old connection is no longer addressed via presence...
        assert!(registry.send_to_user(user_id, chat_notification()).await);
        assert!(rx1.try_recv().is_err());

        // ...but it is still a live, unclosed channel.
        assert!(!tx1.is_closed());
    }

    #[tokio::test]
    async fn remove_connection_clears_presence() {
        let registry = PresenceRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.register_connection(1, tx).await;
        let user_id = UserId::new_v4();
        registry.attach_user(1, user_id).await;

        registry.remove_connection(1).await;
        assert!(!registry.is_connected(user_id).await);
    }
}
