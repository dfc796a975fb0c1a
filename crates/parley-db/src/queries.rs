use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use parley_types::models::{Message, User};

use crate::Database;
use crate::models::{MessageRow, ReactionRow, UserRow, format_time};

impl Database {
    // -- Users --

    /// Insert a user. Returns false, writing nothing, if `username` is taken.
    pub fn create_user(&self, id: Uuid, username: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(username) DO NOTHING",
                (id.to_string(), username, password_hash, format_time(Utc::now())),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    /// Every user except `id`, ordered by username.
    pub fn list_contacts(&self, id: Uuid) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, created_at FROM users
                 WHERE id != ?1
                 ORDER BY username",
            )?;
            let rows = stmt
                .query_map([id.to_string()], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(UserRow::into_user).collect()
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    message.id.to_string(),
                    message.sender_id.to_string(),
                    message.receiver_id.to_string(),
                    message.text,
                    message.image,
                    message.status.as_str(),
                    format_time(message.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| load_message(conn, &id.to_string()))
    }

    /// All messages between `a` and `b`, oldest first.
    pub fn get_conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, text, image, status, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([a.to_string(), b.to_string()], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let mut reactions = reactions_for_messages(conn, &ids)?;

            rows.into_iter()
                .map(|row| {
                    let rs = reactions.remove(&row.id).unwrap_or_default();
                    row.into_message(rs)
                })
                .collect()
        })
    }

    /// Read-modify-write of one message's mutable fields (status and
    /// reactions) under the store lock and inside one transaction.
    ///
    /// Returns `None` without calling `f` if the message does not exist.
    /// Identity, parties, content and timestamp are never written back.
    pub fn update_message<F, T>(&self, id: Uuid, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Message) -> T,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let key = id.to_string();

            let Some(mut message) = load_message(&tx, &key)? else {
                return Ok(None);
            };
            let out = f(&mut message);

            tx.execute(
                "UPDATE messages SET status = ?1 WHERE id = ?2",
                (message.status.as_str(), &key),
            )?;
            tx.execute("DELETE FROM reactions WHERE message_id = ?1", [&key])?;
            for (position, reaction) in message.reactions.iter().enumerate() {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji, position)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        key,
                        reaction.user_id.to_string(),
                        reaction.emoji,
                        position as i64
                    ],
                )?;
            }

            tx.commit()?;
            Ok(Some(out))
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let row = conn
        .query_row(&sql, [value], map_user_row)
        .optional()?;
    Ok(row)
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        image: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn load_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let row = conn
        .query_row(
            "SELECT id, sender_id, receiver_id, text, image, status, created_at
             FROM messages WHERE id = ?1",
            [id],
            map_message_row,
        )
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut reactions = reactions_for_messages(conn, &[row.id.clone()])?;
    let rs = reactions.remove(&row.id).unwrap_or_default();
    Ok(Some(row.into_message(rs)?))
}

/// Batch-fetch reactions for a set of message ids, grouped per message and
/// ordered by position.
fn reactions_for_messages(
    conn: &Connection,
    message_ids: &[String],
) -> Result<HashMap<String, Vec<ReactionRow>>> {
    let mut grouped: HashMap<String, Vec<ReactionRow>> = HashMap::new();
    if message_ids.is_empty() {
        return Ok(grouped);
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT message_id, user_id, emoji, position FROM reactions
         WHERE message_id IN ({})
         ORDER BY message_id, position",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
                position: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for row in rows {
        grouped.entry(row.message_id.clone()).or_default().push(row);
    }
    Ok(grouped)
}
