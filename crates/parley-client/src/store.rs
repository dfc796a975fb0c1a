use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::api::SendMessageRequest;
use parley_types::events::{ClientCommand, EventKind, ServerEvent};
use parley_types::models::{Message, MessageStatus, User};
use parley_types::reactions::{reconcile, set_reaction};
use parley_types::status::advance;

use crate::api::ChatApi;
use crate::error::ClientError;
use crate::socket::{ListenerId, LiveSocket};

/// Event kinds a conversation view listens to while a peer is selected.
const CONVERSATION_EVENTS: [EventKind; 3] = [
    EventKind::NewMessage,
    EventKind::MessageReactionUpdated,
    EventKind::MessageStatusUpdated,
];

/// Listeners registered for the selected peer, and where they deliver.
struct Subscription {
    listeners: Vec<ListenerId>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Local state of the chat view for user `me`.
pub struct ChatStore<A> {
    api: A,
    socket: Arc<LiveSocket>,
    me: Uuid,
    contacts: Vec<User>,
    selected: Option<Uuid>,
    messages: Vec<Message>,
    online: Vec<Uuid>,
    notices: Vec<String>,
    presence_listener: ListenerId,
    presence_rx: mpsc::UnboundedReceiver<ServerEvent>,
    subscription: Option<Subscription>,
}

impl<A: ChatApi> ChatStore<A> {
    pub fn new(api: A, socket: Arc<LiveSocket>, me: Uuid) -> Self {
        let (presence_tx, presence_rx) = mpsc::unbounded_channel();
        let presence_listener = socket.on(EventKind::GetOnlineUsers, presence_tx);
        Self {
            api,
            socket,
            me,
            contacts: Vec::new(),
            selected: None,
            messages: Vec::new(),
            online: Vec::new(),
            notices: Vec::new(),
            presence_listener,
            presence_rx,
            subscription: None,
        }
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn contacts(&self) -> &[User] {
        &self.contacts
    }

    pub fn selected_peer(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn online_users(&self) -> &[Uuid] {
        &self.online
    }

    pub fn is_online(&self, user: Uuid) -> bool {
        self.online.contains(&user)
    }

    /// User-visible notices about failed requests, oldest first.
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    fn notice(&mut self, context: &str, err: &ClientError) {
        warn!("{}: {}", context, err);
        self.notices.push(format!("{}: {}", context, err));
    }

    pub async fn load_contacts(&mut self) -> Result<(), ClientError> {
        match self.api.contacts().await {
            Ok(contacts) => {
                self.contacts = contacts;
                Ok(())
            }
            Err(e) => {
                self.notice("Failed to load contacts", &e);
                Err(e)
            }
        }
    }

    /// Switch the view to `peer`: load the full history, then drop the
    /// previous subscription, acknowledge what arrived while away and listen
    /// for live changes. If the history cannot be loaded the current view is
    /// kept as it was.
    pub async fn select_peer(&mut self, peer: Uuid) -> Result<(), ClientError> {
        let history = match self.api.conversation(peer).await {
            Ok(history) => history,
            Err(e) => {
                self.notice("Failed to load messages", &e);
                return Err(e);
            }
        };

        self.unsubscribe();
        self.selected = Some(peer);
        self.acknowledge(&history);
        self.messages = history;
        self.subscribe();
        Ok(())
    }

    fn subscribe(&mut self) {
        let (tx, events) = mpsc::unbounded_channel();
        let listeners = CONVERSATION_EVENTS
            .iter()
            .map(|&kind| self.socket.on(kind, tx.clone()))
            .collect();
        self.subscription = Some(Subscription { listeners, events });
    }

    /// Tell the server which inbound messages were delivered and read.
    fn acknowledge(&mut self, messages: &[Message]) {
        let me = self.me;
        let inbound = messages.iter().filter(|m| m.receiver_id == me);

        let mut delivered = Vec::new();
        let mut read = Vec::new();
        for message in inbound {
            if message.status == MessageStatus::Sent {
                delivered.push(message.id);
            }
            if message.status != MessageStatus::Read {
                read.push(message.id);
            }
        }

        if !delivered.is_empty() {
            let cmd = ClientCommand::MessageDelivered {
                message_ids: delivered,
            };
            if let Err(e) = self.socket.emit(cmd) {
                self.notice("Failed to send delivery receipt", &e);
            }
        }
        if !read.is_empty() {
            let cmd = ClientCommand::MessageRead { message_ids: read };
            if let Err(e) = self.socket.emit(cmd) {
                self.notice("Failed to send read receipt", &e);
            }
        }
    }

    /// Apply one live event to the local state.
    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Ready { user_id } => {
                debug!("Live channel ready for {}", user_id);
            }

            ServerEvent::NewMessage(message) => {
                // Belongs to another conversation: not this view's concern
                if !message.involves(self.me)
                    || Some(message.counterpart(self.me)) != self.selected
                {
                    return;
                }
                if self.messages.iter().any(|m| m.id == message.id) {
                    return;
                }
                if message.receiver_id == self.me {
                    self.acknowledge(std::slice::from_ref(&message));
                }
                self.messages.push(message);
            }

            ServerEvent::MessageReactionUpdated {
                message_id,
                emoji,
                user_id,
            } => {
                // Our own reactions were already applied when sent
                if user_id == self.me {
                    return;
                }
                if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
                    let emoji = emoji.as_deref();
                    message.reactions = set_reaction(&message.reactions, user_id, emoji);
                }
            }

            ServerEvent::MessageStatusUpdated { message_id, status } => {
                if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
                    message.status = advance(message.status, status).status;
                }
            }

            ServerEvent::GetOnlineUsers { user_ids } => {
                self.online = user_ids;
            }
        }
    }

    /// Apply every event already queued, without waiting. Returns how many
    /// were applied.
    pub fn process_pending(&mut self) -> usize {
        let mut queued = Vec::new();
        while let Ok(event) = self.presence_rx.try_recv() {
            queued.push(event);
        }
        if let Some(subscription) = self.subscription.as_mut() {
            while let Ok(event) = subscription.events.try_recv() {
                queued.push(event);
            }
        }

        let count = queued.len();
        for event in queued {
            self.handle_event(event);
        }
        count
    }

    /// Wait for the next live event, apply it, and return it. `None` once
    /// the socket has gone away.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        let event = match self.subscription.as_mut() {
            Some(subscription) => tokio::select! {
                Some(event) = self.presence_rx.recv() => event,
                Some(event) = subscription.events.recv() => event,
                else => return None,
            },
            None => self.presence_rx.recv().await?,
        };
        self.handle_event(event.clone());
        Some(event)
    }

    /// Send a message to the selected peer and append the stored copy.
    pub async fn send_message(&mut self, req: SendMessageRequest) -> Result<Message, ClientError> {
        let Some(peer) = self.selected else {
            return Err(ClientError::NoPeer);
        };

        match self.api.send_message(peer, &req).await {
            Ok(message) => {
                if !self.messages.iter().any(|m| m.id == message.id) {
                    self.messages.push(message.clone());
                }
                Ok(message)
            }
            Err(e) => {
                self.notice("Failed to send message", &e);
                Err(e)
            }
        }
    }

    /// React to a message: applied locally first, then replaced by the
    /// server's answer, or rolled back if the request fails.
    pub async fn send_reaction(
        &mut self,
        message_id: Uuid,
        emoji: Option<&str>,
    ) -> Result<(), ClientError> {
        let me = self.me;
        let Some(idx) = self.messages.iter().position(|m| m.id == message_id) else {
            let e = ClientError::UnknownMessage(message_id);
            self.notice("Failed to react", &e);
            return Err(e);
        };
        let previous = std::mem::take(&mut self.messages[idx].reactions);
        self.messages[idx].reactions = reconcile(&previous, me, emoji);

        // &mut self is held across the request, so idx stays valid
        match self.api.react(message_id, emoji).await {
            Ok(res) => {
                self.messages[idx].reactions = res.reactions;
                Ok(())
            }
            Err(e) => {
                self.messages[idx].reactions = previous;
                self.notice("Failed to send reaction", &e);
                Err(e)
            }
        }
    }
}

impl<A> ChatStore<A> {
    /// Remove the listeners registered by [`select_peer`](Self::select_peer)
    /// and discard anything they queued. Other listeners on the socket are
    /// left alone.
    pub fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            for id in subscription.listeners {
                self.socket.off(id);
            }
        }
    }
}

impl<A> Drop for ChatStore<A> {
    fn drop(&mut self) {
        self.unsubscribe();
        self.socket.off(self.presence_listener);
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::Utc;
    use parley_types::api::ReactResponse;
    use parley_types::models::Reaction;

    use super::*;

    /// In-memory stand-in for the REST side.
    #[derive(Default)]
    struct FakeApi {
        messages: Mutex<Vec<Message>>,
        fail: AtomicBool,
    }

    impl FakeApi {
        fn with(messages: Vec<Message>) -> Self {
            Self {
                messages: Mutex::new(messages),
                fail: AtomicBool::new(false),
            }
        }

        fn check(&self) -> Result<(), ClientError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Server {
                    status: 500,
                    message: "internal server error".into(),
                });
            }
            Ok(())
        }

        fn stored(&self, id: Uuid) -> Message {
            let messages = self.messages.lock().unwrap();
            messages.iter().find(|m| m.id == id).cloned().unwrap()
        }

        fn edit(&self, id: Uuid, f: impl FnOnce(&mut Message)) {
            let mut messages = self.messages.lock().unwrap();
            f(messages.iter_mut().find(|m| m.id == id).unwrap());
        }
    }

    impl ChatApi for FakeApi {
        async fn contacts(&self) -> Result<Vec<User>, ClientError> {
            self.check()?;
            Ok(Vec::new())
        }

        async fn conversation(&self, peer_id: Uuid) -> Result<Vec<Message>, ClientError> {
            self.check()?;
            let messages = self.messages.lock().unwrap();
            Ok(messages
                .iter()
                .filter(|m| m.involves(peer_id))
                .cloned()
                .collect())
        }

        async fn send_message(
            &self,
            peer_id: Uuid,
            req: &SendMessageRequest,
        ) -> Result<Message, ClientError> {
            self.check()?;
            let mut messages = self.messages.lock().unwrap();
            let sender_id = messages
                .first()
                .map(|m| m.counterpart(peer_id))
                .unwrap_or_else(Uuid::new_v4);
            let mut message = msg(sender_id, peer_id, MessageStatus::Sent);
            message.text = req.normalized_text();
            messages.push(message.clone());
            Ok(message)
        }

        async fn react(
            &self,
            message_id: Uuid,
            emoji: Option<&str>,
        ) -> Result<ReactResponse, ClientError> {
            self.check()?;
            let mut messages = self.messages.lock().unwrap();
            let message = messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or(ClientError::UnknownMessage(message_id))?;
            // Reacts as the receiver, which is the local user in these tests
            message.reactions = reconcile(&message.reactions, message.receiver_id, emoji);
            Ok(ReactResponse {
                message_id,
                reactions: message.reactions.clone(),
            })
        }
    }

    fn msg(sender_id: Uuid, receiver_id: Uuid, status: MessageStatus) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            text: Some("hi".into()),
            image: None,
            status,
            reactions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn reaction(user_id: Uuid, emoji: &str) -> Reaction {
        Reaction {
            user_id,
            emoji: emoji.into(),
        }
    }

    fn reaction_event(message_id: Uuid, user_id: Uuid, emoji: Option<&str>) -> ServerEvent {
        ServerEvent::MessageReactionUpdated {
            message_id,
            emoji: emoji.map(str::to_string),
            user_id,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientCommand>) -> Vec<ClientCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[tokio::test]
    async fn selecting_a_peer_acknowledges_unread_inbound_messages() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let fresh = msg(peer, me, MessageStatus::Sent);
        let delivered = msg(peer, me, MessageStatus::Delivered);
        let read = msg(peer, me, MessageStatus::Read);
        let outbound = msg(me, peer, MessageStatus::Sent);
        let api = FakeApi::with(vec![fresh.clone(), delivered.clone(), read, outbound]);
        let (socket, mut out) = LiveSocket::new();
        let mut store = ChatStore::new(api, socket, me);

        store.select_peer(peer).await.unwrap();

        assert_eq!(store.messages().len(), 4);
        let expected = vec![
            ClientCommand::MessageDelivered {
                message_ids: vec![fresh.id],
            },
            ClientCommand::MessageRead {
                message_ids: vec![fresh.id, delivered.id],
            },
        ];
        assert_eq!(drain(&mut out), expected);
    }

    #[tokio::test]
    async fn failed_history_load_keeps_the_current_view() {
        let (me, peer, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let existing = msg(peer, me, MessageStatus::Read);
        let (socket, _out) = LiveSocket::new();
        let api = FakeApi::with(vec![existing.clone()]);
        let mut store = ChatStore::new(api, socket.clone(), me);
        store.select_peer(peer).await.unwrap();
        let listeners = socket.listener_count();

        store.api.fail.store(true, Ordering::SeqCst);
        let result = store.select_peer(other).await;

        assert!(matches!(result, Err(ClientError::Server { status: 500, .. })));
        assert_eq!(store.selected_peer(), Some(peer));
        assert_eq!(store.messages(), &[existing.clone()]);
        assert_eq!(socket.listener_count(), listeners);
        assert_eq!(store.take_notices().len(), 1);

        // Still subscribed to the old conversation
        store.api.fail.store(false, Ordering::SeqCst);
        socket.deliver(&reaction_event(existing.id, peer, Some("🎉")));
        assert_eq!(store.process_pending(), 1);
        assert_eq!(store.messages()[0].reactions, vec![reaction(peer, "🎉")]);
    }

    #[tokio::test]
    async fn new_message_for_another_conversation_is_ignored() {
        let (me, peer, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (socket, mut out) = LiveSocket::new();
        let mut store = ChatStore::new(FakeApi::default(), socket.clone(), me);
        store.select_peer(peer).await.unwrap();

        socket.deliver(&ServerEvent::NewMessage(msg(other, me, MessageStatus::Sent)));
        assert_eq!(store.process_pending(), 1);

        assert!(store.messages().is_empty());
        assert!(drain(&mut out).is_empty());
    }

    #[tokio::test]
    async fn new_message_from_selected_peer_is_appended_once_and_acked() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let (socket, mut out) = LiveSocket::new();
        let mut store = ChatStore::new(FakeApi::default(), socket.clone(), me);
        store.select_peer(peer).await.unwrap();

        let incoming = msg(peer, me, MessageStatus::Sent);
        socket.deliver(&ServerEvent::NewMessage(incoming.clone()));
        socket.deliver(&ServerEvent::NewMessage(incoming.clone()));
        store.process_pending();

        assert_eq!(store.messages(), &[incoming.clone()]);
        let expected = vec![
            ClientCommand::MessageDelivered {
                message_ids: vec![incoming.id],
            },
            ClientCommand::MessageRead {
                message_ids: vec![incoming.id],
            },
        ];
        assert_eq!(drain(&mut out), expected);
    }

    #[tokio::test]
    async fn peer_reactions_are_applied_and_own_echoes_skipped() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let mut mine = msg(me, peer, MessageStatus::Read);
        mine.reactions = vec![reaction(me, "👍")];
        let (socket, _out) = LiveSocket::new();
        let mut store = ChatStore::new(FakeApi::with(vec![mine.clone()]), socket.clone(), me);
        store.select_peer(peer).await.unwrap();

        socket.deliver(&reaction_event(mine.id, peer, Some("❤️")));
        // Echo of our own reaction carrying a stale outcome
        socket.deliver(&reaction_event(mine.id, me, None));
        store.process_pending();

        let expected = vec![reaction(me, "👍"), reaction(peer, "❤️")];
        assert_eq!(store.messages()[0].reactions, expected);

        socket.deliver(&reaction_event(mine.id, peer, None));
        store.process_pending();
        assert_eq!(store.messages()[0].reactions, vec![reaction(me, "👍")]);
    }

    #[tokio::test]
    async fn queued_peer_reaction_does_not_undo_a_settled_answer() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let theirs = msg(peer, me, MessageStatus::Read);
        let (socket, _out) = LiveSocket::new();
        let api = FakeApi::with(vec![theirs.clone()]);
        let mut store = ChatStore::new(api, socket.clone(), me);
        store.select_peer(peer).await.unwrap();

        // Peer's reaction is committed and its event is still queued
        let fake = &store.api;
        fake.edit(theirs.id, |m| m.reactions = vec![reaction(peer, "❤️")]);
        socket.deliver(&reaction_event(theirs.id, peer, Some("❤️")));

        // Our answer already includes it
        store.send_reaction(theirs.id, Some("👍")).await.unwrap();
        store.process_pending();

        let server = store.api.stored(theirs.id).reactions;
        assert_eq!(server, vec![reaction(peer, "❤️"), reaction(me, "👍")]);
        assert_eq!(store.messages()[0].reactions, server);
    }

    #[tokio::test]
    async fn status_events_never_move_backwards() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let sent = msg(me, peer, MessageStatus::Sent);
        let (socket, _out) = LiveSocket::new();
        let mut store = ChatStore::new(FakeApi::with(vec![sent.clone()]), socket.clone(), me);
        store.select_peer(peer).await.unwrap();

        for status in [MessageStatus::Read, MessageStatus::Delivered] {
            socket.deliver(&ServerEvent::MessageStatusUpdated {
                message_id: sent.id,
                status,
            });
        }
        store.process_pending();

        assert_eq!(store.messages()[0].status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn reselecting_replaces_listeners_without_duplicates() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let sent = msg(me, peer, MessageStatus::Sent);
        let (socket, _out) = LiveSocket::new();
        let mut store = ChatStore::new(FakeApi::with(vec![sent.clone()]), socket.clone(), me);

        for _ in 0..3 {
            store.select_peer(peer).await.unwrap();
        }
        assert_eq!(socket.listener_count(), 1 + CONVERSATION_EVENTS.len());

        assert_eq!(socket.deliver(&reaction_event(sent.id, peer, Some("😂"))), 1);
        assert_eq!(store.process_pending(), 1);
        assert_eq!(store.messages()[0].reactions.len(), 1);

        drop(store);
        assert_eq!(socket.listener_count(), 0);
    }

    #[tokio::test]
    async fn presence_snapshots_replace_the_online_set() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let (socket, _out) = LiveSocket::new();
        let mut store = ChatStore::new(FakeApi::default(), socket.clone(), me);

        socket.deliver(&ServerEvent::GetOnlineUsers {
            user_ids: vec![me, peer],
        });
        socket.deliver(&ServerEvent::GetOnlineUsers { user_ids: vec![me] });
        store.process_pending();

        assert!(store.is_online(me));
        assert!(!store.is_online(peer));
    }

    #[tokio::test]
    async fn failed_reaction_rolls_back_and_leaves_a_notice() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let theirs = msg(peer, me, MessageStatus::Read);
        let (socket, _out) = LiveSocket::new();
        let mut store = ChatStore::new(FakeApi::with(vec![theirs.clone()]), socket, me);
        store.select_peer(peer).await.unwrap();

        store.api.fail.store(true, Ordering::SeqCst);
        let result = store.send_reaction(theirs.id, Some("🔥")).await;

        assert!(matches!(result, Err(ClientError::Server { status: 500, .. })));
        assert!(store.messages()[0].reactions.is_empty());
        assert_eq!(store.take_notices().len(), 1);
        assert!(store.notices().is_empty());
    }

    #[tokio::test]
    async fn reaction_settles_on_server_answer() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let theirs = msg(peer, me, MessageStatus::Read);
        let (socket, _out) = LiveSocket::new();
        let mut store = ChatStore::new(FakeApi::with(vec![theirs.clone()]), socket, me);
        store.select_peer(peer).await.unwrap();

        store.send_reaction(theirs.id, Some("🔥")).await.unwrap();
        assert_eq!(store.messages()[0].reactions, vec![reaction(me, "🔥")]);

        store.send_reaction(theirs.id, None).await.unwrap();
        assert!(store.messages()[0].reactions.is_empty());
    }

    #[tokio::test]
    async fn sent_message_is_not_duplicated_by_its_echo() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let seed = msg(me, peer, MessageStatus::Read);
        let (socket, _out) = LiveSocket::new();
        let mut store = ChatStore::new(FakeApi::with(vec![seed]), socket.clone(), me);
        store.select_peer(peer).await.unwrap();

        let req = SendMessageRequest {
            text: Some("  hello ".into()),
            image: None,
        };
        let sent = store.send_message(req).await.unwrap();
        assert_eq!(sent.text.as_deref(), Some("hello"));

        socket.deliver(&ServerEvent::NewMessage(sent.clone()));
        store.process_pending();

        let copies = store.messages().iter().filter(|m| m.id == sent.id).count();
        assert_eq!(copies, 1);
    }

    #[tokio::test]
    async fn sending_without_a_peer_fails() {
        let (socket, _out) = LiveSocket::new();
        let mut store = ChatStore::new(FakeApi::default(), socket, Uuid::new_v4());
        let result = store.send_message(SendMessageRequest::default()).await;
        assert!(matches!(result, Err(ClientError::NoPeer)));
    }
}
