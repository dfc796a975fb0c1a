//! Batch status acknowledgements from a receiver's client.

use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::ServerEvent;
use parley_types::models::MessageStatus;
use parley_types::status::advance;

use crate::dispatcher::Dispatcher;

/// A status transition that was applied and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub status: MessageStatus,
}

/// Why an id in a batch was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NotFound,
    /// Only the receiver may acknowledge a message.
    NotReceiver,
    /// The message is already at or past the requested status.
    InvalidTransition,
}

enum Outcome {
    Changed(StatusChange),
    Skipped(Skip),
}

/// Advance every message in `message_ids` to `target` on behalf of `actor`.
///
/// Each id is handled on its own: missing messages, messages the actor did
/// not receive, invalid transitions and store failures are skipped without
/// stopping the rest of the batch.
pub fn advance_batch(
    db: &Database,
    actor: Uuid,
    message_ids: &[Uuid],
    target: MessageStatus,
) -> Vec<StatusChange> {
    let mut changes = Vec::new();

    for &message_id in message_ids {
        let result = db.update_message(message_id, |message| {
            if message.receiver_id != actor {
                return Outcome::Skipped(Skip::NotReceiver);
            }
            let step = advance(message.status, target);
            if !step.changed {
                return Outcome::Skipped(Skip::InvalidTransition);
            }
            message.status = step.status;
            Outcome::Changed(StatusChange {
                message_id,
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                status: step.status,
            })
        });

        match result {
            Ok(Some(Outcome::Changed(change))) => changes.push(change),
            Ok(Some(Outcome::Skipped(reason))) => {
                debug!("{} -> {}: skipped message {} ({:?})", actor, target, message_id, reason);
            }
            Ok(None) => {
                debug!(
                    "{} -> {}: skipped message {} ({:?})",
                    actor,
                    target,
                    message_id,
                    Skip::NotFound
                );
            }
            Err(e) => {
                warn!("{} -> {}: store error on message {}: {}", actor, target, message_id, e);
            }
        }
    }

    changes
}

/// Apply a batch off the async runtime, then notify both parties of every
/// message that actually changed.
pub async fn apply_status_batch(
    db: Arc<Database>,
    dispatcher: &Dispatcher,
    actor: Uuid,
    message_ids: Vec<Uuid>,
    target: MessageStatus,
) -> Vec<StatusChange> {
    let changes = match tokio::task::spawn_blocking(move || {
        advance_batch(&db, actor, &message_ids, target)
    })
    .await
    {
        Ok(changes) => changes,
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return Vec::new();
        }
    };

    for change in &changes {
        dispatcher
            .dispatch(
                ServerEvent::MessageStatusUpdated {
                    message_id: change.message_id,
                    status: change.status,
                },
                change.sender_id,
                change.receiver_id,
            )
            .await;
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::Connection;
    use chrono::Utc;
    use parley_types::models::Message;

    struct Fixture {
        db: Arc<Database>,
        alice: Uuid,
        bob: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        db.create_user(alice, "alice", "hash").unwrap();
        db.create_user(bob, "bob", "hash").unwrap();
        Fixture {
            db: Arc::new(db),
            alice,
            bob,
        }
    }

    fn send(db: &Database, from: Uuid, to: Uuid, status: MessageStatus) -> Uuid {
        let msg = Message {
            id: Uuid::new_v4(),
            sender_id: from,
            receiver_id: to,
            text: Some("hi".into()),
            image: None,
            status,
            reactions: vec![],
            created_at: Utc::now(),
        };
        db.insert_message(&msg).unwrap();
        msg.id
    }

    fn status_of(db: &Database, id: Uuid) -> MessageStatus {
        db.get_message(id).unwrap().unwrap().status
    }

    #[test]
    fn read_skips_delivered() {
        let f = fixture();
        let id = send(&f.db, f.alice, f.bob, MessageStatus::Sent);

        let changes = advance_batch(&f.db, f.bob, &[id], MessageStatus::Read);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].status, MessageStatus::Read);
        assert_eq!(status_of(&f.db, id), MessageStatus::Read);
    }

    #[test]
    fn delivered_after_read_is_a_no_op() {
        let f = fixture();
        let id = send(&f.db, f.alice, f.bob, MessageStatus::Read);

        assert!(advance_batch(&f.db, f.bob, &[id], MessageStatus::Delivered).is_empty());
        assert_eq!(status_of(&f.db, id), MessageStatus::Read);
    }

    #[test]
    fn sender_cannot_advance_own_message() {
        let f = fixture();
        let id = send(&f.db, f.alice, f.bob, MessageStatus::Sent);

        assert!(advance_batch(&f.db, f.alice, &[id], MessageStatus::Read).is_empty());
        assert_eq!(status_of(&f.db, id), MessageStatus::Sent);
    }

    #[test]
    fn batch_continues_past_bad_ids() {
        let f = fixture();
        let first = send(&f.db, f.alice, f.bob, MessageStatus::Sent);
        let already = send(&f.db, f.alice, f.bob, MessageStatus::Delivered);
        let foreign = send(&f.db, f.bob, f.alice, MessageStatus::Sent);
        let last = send(&f.db, f.alice, f.bob, MessageStatus::Sent);

        let ids = [first, Uuid::new_v4(), already, foreign, last];
        let changed: Vec<Uuid> = advance_batch(&f.db, f.bob, &ids, MessageStatus::Delivered)
            .into_iter()
            .map(|c| c.message_id)
            .collect();

        assert_eq!(changed, vec![first, last]);
        assert_eq!(status_of(&f.db, foreign), MessageStatus::Sent);
    }

    #[tokio::test]
    async fn changes_are_fanned_out_to_both_parties() {
        let f = fixture();
        let dispatcher = Dispatcher::new();
        let (conn_a, mut rx_a) = Connection::channel();
        let (conn_b, mut rx_b) = Connection::channel();
        dispatcher.presence().register(f.alice, conn_a).await;
        dispatcher.presence().register(f.bob, conn_b).await;

        let id = send(&f.db, f.alice, f.bob, MessageStatus::Sent);
        let target = MessageStatus::Read;
        let changes = apply_status_batch(f.db.clone(), &dispatcher, f.bob, vec![id], target).await;
        assert_eq!(changes.len(), 1);

        let expected = ServerEvent::MessageStatusUpdated {
            message_id: id,
            status: MessageStatus::Read,
        };
        for rx in [&mut rx_a, &mut rx_b] {
            let events: Vec<ServerEvent> = std::iter::from_fn(|| rx.try_recv().ok())
                .filter(|e| !matches!(e, ServerEvent::GetOnlineUsers { .. }))
                .collect();
            assert_eq!(events, vec![expected.clone()]);
        }
    }
}
