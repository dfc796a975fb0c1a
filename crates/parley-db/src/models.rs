//! Database row types. These map directly to SQLite rows and are converted
//! into `parley-types` models at the edge of this crate.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::models::{Message, MessageStatus, Reaction, User};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id)?,
            username: self.username,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub status: String,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self, reactions: Vec<ReactionRow>) -> Result<Message> {
        let reactions = reactions
            .into_iter()
            .map(|r| {
                Ok(Reaction {
                    user_id: parse_id(&r.user_id)?,
                    emoji: r.emoji,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Message {
            id: parse_id(&self.id)?,
            sender_id: parse_id(&self.sender_id)?,
            receiver_id: parse_id(&self.receiver_id)?,
            text: self.text,
            image: self.image,
            status: self
                .status
                .parse::<MessageStatus>()
                .with_context(|| format!("corrupt status on message {}", self.id))?,
            reactions,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub position: i64,
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{}'", raw))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

/// Timestamps are stored as fixed-width RFC 3339 so that text ordering
/// matches chronological ordering.
pub fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
