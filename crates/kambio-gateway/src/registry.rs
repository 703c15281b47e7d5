use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use kambio_types::events::SupportEvent;

/// Tracks live support-desk WebSocket connections: one socket per user on
/// their own conversation, any number of admin sockets watching the desk.
#[derive(Clone)]
pub struct SupportRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// user_id -> (conn_id, sender). A reconnect replaces the entry; the
    /// conn_id lets the stale connection's cleanup detect it lost ownership.
    users: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<SupportEvent>)>>,

    /// admin_id -> (conn_id, sender). Every admin gets every desk event.
    admins: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<SupportEvent>)>>,
}

impl SupportRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                users: RwLock::new(HashMap::new()),
                admins: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a user connection. Returns (conn_id, receiver).
    pub async fn register_user(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<SupportEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.users.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a user connection, but only if conn_id still matches.
    pub async fn unregister_user(&self, user_id: Uuid, conn_id: Uuid) {
        let mut users = self.inner.users.write().await;
        if let Some((stored_conn_id, _)) = users.get(&user_id) {
            if *stored_conn_id == conn_id {
                users.remove(&user_id);
            }
        }
    }

    pub async fn register_admin(&self, admin_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<SupportEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.admins.write().await.insert(admin_id, (conn_id, tx));
        (conn_id, rx)
    }

    pub async fn unregister_admin(&self, admin_id: Uuid, conn_id: Uuid) {
        let mut admins = self.inner.admins.write().await;
        if let Some((stored_conn_id, _)) = admins.get(&admin_id) {
            if *stored_conn_id == conn_id {
                admins.remove(&admin_id);
            }
        }
    }

    /// Push an event to one user's socket, if connected.
    pub async fn send_to_user(&self, user_id: Uuid, event: SupportEvent) {
        let users = self.inner.users.read().await;
        if let Some((_, tx)) = users.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    pub async fn send_to_admin(&self, admin_id: Uuid, event: SupportEvent) {
        let admins = self.inner.admins.read().await;
        if let Some((_, tx)) = admins.get(&admin_id) {
            let _ = tx.send(event);
        }
    }

    /// Fan an event out to every connected admin.
    pub async fn broadcast_to_admins(&self, event: SupportEvent) {
        let admins = self.inner.admins.read().await;
        for (_, tx) in admins.values() {
            let _ = tx.send(event.clone());
        }
    }

    pub async fn user_connected(&self, user_id: Uuid) -> bool {
        self.inner.users.read().await.contains_key(&user_id)
    }
}

impl Default for SupportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kambio_types::models::SupportMessage;

    #[tokio::test]
    async fn send_to_user_reaches_only_that_user() {
        let registry = SupportRegistry::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (_, mut alice_rx) = registry.register_user(alice).await;
        let (_, mut bob_rx) = registry.register_user(bob).await;

        registry.send_to_user(alice, SupportEvent::Pong).await;

        assert!(matches!(alice_rx.recv().await, Some(SupportEvent::Pong)));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn admin_broadcast_reaches_all_admins() {
        let registry = SupportRegistry::new();
        let (_, mut rx1) = registry.register_admin(Uuid::new_v4()).await;
        let (_, mut rx2) = registry.register_admin(Uuid::new_v4()).await;

        let event = SupportEvent::NewUserMessage {
            user_id: Uuid::new_v4(),
            message: SupportMessage::system("hi"),
        };
        registry.broadcast_to_admins(event).await;

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn stale_connection_cannot_unregister_its_replacement() {
        let registry = SupportRegistry::new();
        let user = Uuid::new_v4();

        let (old_conn, _old_rx) = registry.register_user(user).await;
        let (_new_conn, mut new_rx) = registry.register_user(user).await;

        // Cleanup from the replaced connection must not evict the new one.
        registry.unregister_user(user, old_conn).await;
        assert!(registry.user_connected(user).await);

        registry.send_to_user(user, SupportEvent::Pong).await;
        assert!(new_rx.recv().await.is_some());
    }
}
