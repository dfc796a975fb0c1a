use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use parley_types::events::ServerEvent;

use crate::presence::PresenceRegistry;

/// Routes events to the live sockets of the parties involved.
///
/// Delivery is fire-and-forget: a party without a live socket simply misses
/// the event and catches up from the store on its next fetch.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    presence: PresenceRegistry,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                presence: PresenceRegistry::new(),
            }),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    /// Deliver `event` to the sender's and the receiver's live sockets.
    ///
    /// Each connection gets the event at most once, so self-messages and
    /// parties sharing a socket see it a single time. Returns how many
    /// connections accepted it.
    pub async fn dispatch(&self, event: ServerEvent, sender_id: Uuid, receiver_id: Uuid) -> usize {
        let presence = self.presence();
        let sender = presence.resolve(sender_id).await;
        let receiver = presence.resolve(receiver_id).await;

        let receiver = match (&sender, receiver) {
            (Some(s), Some(r)) if s.id() == r.id() => None,
            (_, r) => r,
        };

        let mut delivered = 0;
        for connection in [sender, receiver].into_iter().flatten() {
            if connection.send(event.clone()) {
                delivered += 1;
            }
        }

        trace!(
            "{:?} fanned out to {} connection(s) ({} -> {})",
            event.kind(),
            delivered,
            sender_id,
            receiver_id
        );
        delivered
    }

    /// Deliver `event` to one user's live socket, if any.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> bool {
        match self.presence().resolve(user_id).await {
            Some(connection) => connection.send(event),
            None => false,
        }
    }
}
