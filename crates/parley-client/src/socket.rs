//! Client end of the live channel.
//!
//! Listeners register per [`EventKind`] and get back a [`ListenerId`]; only
//! that id removes them again, so a component tearing down its own listeners
//! never touches anyone else's.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use parley_types::events::{ClientCommand, EventKind, ServerEvent};

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    kind: EventKind,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

pub struct LiveSocket {
    listeners: Mutex<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<ClientCommand>,
}

impl LiveSocket {
    /// A socket not bound to any transport. Commands passed to
    /// [`emit`](Self::emit) come out of the returned receiver and events are
    /// fed in with [`deliver`](Self::deliver).
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ClientCommand>) {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let socket = Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            outgoing,
        });
        (socket, outgoing_rx)
    }

    /// Open the gateway at `url` (e.g. `ws://host:3000/gateway`) as the user
    /// owning `token`.
    ///
    /// Dropping the last handle closes the connection.
    pub async fn connect(url: &str, token: &str) -> Result<Arc<Self>, ClientError> {
        let (ws, _response) = connect_async(format!("{}?token={}", url, token)).await?;
        let (mut ws_sender, mut ws_reader) = ws.split();
        let (socket, mut outgoing_rx) = Self::new();
        info!("Connected to live channel at {}", url);

        tokio::spawn(async move {
            while let Some(cmd) = outgoing_rx.recv().await {
                let text = match serde_json::to_string(&cmd) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode command: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let weak: Weak<Self> = Arc::downgrade(&socket);
        tokio::spawn(async move {
            while let Some(Ok(msg)) = ws_reader.next().await {
                let Some(socket) = weak.upgrade() else { break };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            socket.deliver(&event);
                        }
                        Err(e) => warn!("Unparseable live event: {}", e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            debug!("Live channel reader finished");
        });

        Ok(socket)
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<ListenerId, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward every event of `kind` to `tx` until [`off`](Self::off).
    pub fn on(&self, kind: EventKind, tx: mpsc::UnboundedSender<ServerEvent>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().insert(id, Listener { kind, tx });
        id
    }

    /// Remove one listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners().remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    /// Hand `event` to each listener of its kind. Listeners whose receiver
    /// was dropped are pruned. Returns how many listeners accepted it.
    pub fn deliver(&self, event: &ServerEvent) -> usize {
        let kind = event.kind();
        let mut delivered = 0;
        self.listeners().retain(|_, listener| {
            if listener.kind != kind {
                return true;
            }
            let alive = listener.tx.send(event.clone()).is_ok();
            if alive {
                delivered += 1;
            }
            alive
        });
        delivered
    }

    /// Queue a command for the server.
    pub fn emit(&self, cmd: ClientCommand) -> Result<(), ClientError> {
        self.outgoing.send(cmd).map_err(|_| ClientError::Closed)
    }
}
