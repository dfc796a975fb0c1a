use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use parley_types::events::ServerEvent;

/// Identity of one live socket. A reconnecting user gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle to a live socket: its id plus the sending half of the channel
/// drained by the socket's writer task.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Connection {
    /// Create a handle and the receiver its writer task should drain.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event for this socket. Returns false if the writer is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Who is online, and through which socket. One entry per user; the most
/// recent connection wins.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<Uuid, Connection>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connection` the live socket for `user_id`, replacing any older
    /// one, then push the online snapshot to everyone.
    pub async fn register(&self, user_id: Uuid, connection: Connection) -> ConnectionId {
        let conn_id = connection.id();
        let previous = self.entries.write().await.insert(user_id, connection);

        if let Some(previous) = previous {
            info!(
                "{} reconnected: connection {} replaces {}",
                user_id,
                conn_id,
                previous.id()
            );
        }

        self.broadcast_online().await;
        conn_id
    }

    pub async fn resolve(&self, user_id: Uuid) -> Option<Connection> {
        self.entries.read().await.get(&user_id).cloned()
    }

    /// Remove `user_id`, but only if `conn_id` is still its live socket.
    /// A late disconnect from a replaced socket leaves the newer one alone.
    pub async fn unregister(&self, user_id: Uuid, conn_id: ConnectionId) -> bool {
        let removed = {
            let mut entries = self.entries.write().await;
            match entries.get(&user_id) {
                Some(current) if current.id() == conn_id => {
                    entries.remove(&user_id);
                    true
                }
                _ => false,
            }
        };

        if removed {
            self.broadcast_online().await;
        } else {
            debug!(
                "Stale disconnect for {} on {} ignored (newer connection registered)",
                user_id, conn_id
            );
        }
        removed
    }

    /// Ids of all online users, sorted.
    pub async fn online_users(&self) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self.entries.read().await.keys().copied().collect();
        users.sort();
        users
    }

    async fn broadcast_online(&self) {
        let entries = self.entries.read().await;
        let mut user_ids: Vec<Uuid> = entries.keys().copied().collect();
        user_ids.sort();

        let event = ServerEvent::GetOnlineUsers { user_ids };
        for connection in entries.values() {
            let _ = connection.send(event.clone());
        }
    }
}
