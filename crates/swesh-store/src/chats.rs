//! Chat threads and their per-user unread counters.
//!
//! Exactly one chat exists per match (UNIQUE on `match_id`); it is created
//! inside the same transaction that creates the match.  The unread
//! counters live in one JSON column keyed by user id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::{col_json, col_ts_opt, col_uuid, Database};
use crate::error::{Result, StoreError};
use crate::models::Chat;

const CHAT_COLS: &str = "id, match_id, user_a, user_b, last_message_at, unread_counts";

impl Database {
    /// Fetch the chat attached to a match.
    pub fn get_chat(&self, match_id: Uuid) -> Result<Chat> {
        get_chat_by_match(self.conn(), match_id)
    }
}

/// Create the chat for a freshly inserted match, with both participants'
/// unread counters at zero.
pub(crate) fn create_chat(
    conn: &Connection,
    match_id: Uuid,
    user_a: Uuid,
    user_b: Uuid,
) -> Result<Chat> {
    let mut unread_counts = BTreeMap::new();
    unread_counts.insert(user_a, 0i64);
    unread_counts.insert(user_b, 0i64);

    let chat = Chat {
        id: Uuid::new_v4(),
        match_id,
        user_a,
        user_b,
        last_message_at: None,
        unread_counts,
    };

    conn.execute(
        "INSERT INTO chats (id, match_id, user_a, user_b, last_message_at, unread_counts)
         VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
        params![
            chat.id.to_string(),
            chat.match_id.to_string(),
            chat.user_a.to_string(),
            chat.user_b.to_string(),
            serde_json::to_string(&chat.unread_counts)?,
        ],
    )?;

    Ok(chat)
}

pub(crate) fn get_chat_by_match(conn: &Connection, match_id: Uuid) -> Result<Chat> {
    conn.query_row(
        &format!("SELECT {CHAT_COLS} FROM chats WHERE match_id = ?1"),
        params![match_id.to_string()],
        row_to_chat,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

pub(crate) fn get_chat_by_id(conn: &Connection, chat_id: Uuid) -> Result<Chat> {
    conn.query_row(
        &format!("SELECT {CHAT_COLS} FROM chats WHERE id = ?1"),
        params![chat_id.to_string()],
        row_to_chat,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    })
}

/// Add one unread message for each listed user and stamp the thread's
/// last-message time.
pub(crate) fn bump_unread(
    conn: &Connection,
    chat_id: Uuid,
    users: &[Uuid],
    at: DateTime<Utc>,
) -> Result<()> {
    let chat = get_chat_by_id(conn, chat_id)?;
    let mut unread_counts = chat.unread_counts;
    for user in users {
        *unread_counts.entry(*user).or_insert(0) += 1;
    }

    conn.execute(
        "UPDATE chats SET unread_counts = ?2, last_message_at = ?3 WHERE id = ?1",
        params![
            chat_id.to_string(),
            serde_json::to_string(&unread_counts)?,
            at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Reset one user's unread counter to zero.
pub(crate) fn zero_unread(conn: &Connection, chat_id: Uuid, user_id: Uuid) -> Result<()> {
    let chat = get_chat_by_id(conn, chat_id)?;
    let mut unread_counts = chat.unread_counts;
    unread_counts.insert(user_id, 0);

    conn.execute(
        "UPDATE chats SET unread_counts = ?2 WHERE id = ?1",
        params![chat_id.to_string(), serde_json::to_string(&unread_counts)?],
    )?;
    Ok(())
}

pub(crate) fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: col_uuid(row, 0)?,
        match_id: col_uuid(row, 1)?,
        user_a: col_uuid(row, 2)?,
        user_b: col_uuid(row, 3)?,
        last_message_at: col_ts_opt(row, 4)?,
        unread_counts: col_json(row, 5)?,
    })
}
