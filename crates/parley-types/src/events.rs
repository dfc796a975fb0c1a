use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageStatus};

/// Events pushed over the live channel, server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Connection accepted and registered for this user
    Ready { user_id: Uuid },

    /// A message was sent to the receiving user
    NewMessage(Message),

    /// A user's reaction on a message changed. `emoji` is that user's
    /// reaction after the change, `None` once removed.
    MessageReactionUpdated {
        message_id: Uuid,
        emoji: Option<String>,
        user_id: Uuid,
    },

    /// A message moved forward in its status lifecycle
    MessageStatusUpdated {
        message_id: Uuid,
        status: MessageStatus,
    },

    /// Full snapshot of who is online, sent on every presence change
    GetOnlineUsers { user_ids: Vec<Uuid> },
}

/// Discriminant of [`ServerEvent`], used to register listeners per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    NewMessage,
    MessageReactionUpdated,
    MessageStatusUpdated,
    GetOnlineUsers,
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready { .. } => EventKind::Ready,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::MessageReactionUpdated { .. } => EventKind::MessageReactionUpdated,
            Self::MessageStatusUpdated { .. } => EventKind::MessageStatusUpdated,
            Self::GetOnlineUsers { .. } => EventKind::GetOnlineUsers,
        }
    }
}

/// Commands sent FROM client TO server over the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// The receiver's client got these messages
    MessageDelivered { message_ids: Vec<Uuid> },

    /// The receiver's client displayed these messages
    MessageRead { message_ids: Vec<Uuid> },
}

impl ClientCommand {
    /// Status the command asks the server to advance to.
    pub fn target_status(&self) -> MessageStatus {
        match self {
            Self::MessageDelivered { .. } => MessageStatus::Delivered,
            Self::MessageRead { .. } => MessageStatus::Read,
        }
    }

    pub fn message_ids(&self) -> &[Uuid] {
        match self {
            Self::MessageDelivered { message_ids } | Self::MessageRead { message_ids } => {
                message_ids
            }
        }
    }
}
