//! Chat messages and read receipts.
//!
//! User messages require an active match; the cascade's system messages do
//! not, so an archived thread still shows why it was archived.  Reading a
//! thread is allowed in any match state and resets the caller's unread
//! counter.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use swesh_core::constants::MAX_MESSAGE_CHARS;
use swesh_core::MatchStatus;

use crate::chats::{bump_unread, get_chat_by_match, zero_unread};
use crate::database::{col_json, col_ts, col_uuid, col_uuid_opt, Database};
use crate::error::{Result, StoreError};
use crate::matches::get_match;
use crate::models::{Match, Message};
use crate::users::get_user;

const MESSAGE_COLS: &str = "id, chat_id, sender_id, content, read_by, is_system, created_at";

/// A sent message plus what the server needs to notify the recipient.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub message: Message,
    pub match_id: Uuid,
    pub recipient_id: Uuid,
    pub sender_nickname: String,
}

impl Database {
    /// Post a message to a match's chat.
    ///
    /// Fails with [`StoreError::MatchNotActive`] once the match has left
    /// the active state: archived and completed threads are read-only for
    /// users.
    pub fn send_message(
        &mut self,
        match_id: Uuid,
        sender: Uuid,
        content: &str,
    ) -> Result<SendOutcome> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::InvalidMessage("empty message".into()));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(StoreError::InvalidMessage(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let tx = self.write_tx()?;

        let m = get_match(&tx, match_id)?;
        if !m.has_participant(sender) {
            return Err(StoreError::NotParticipant);
        }
        if m.status != MatchStatus::Active {
            return Err(StoreError::MatchNotActive);
        }

        let chat = get_chat_by_match(&tx, match_id)?;
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            chat_id: chat.id,
            sender_id: Some(sender),
            content: content.to_string(),
            read_by: vec![sender],
            is_system: false,
            created_at: now,
        };

        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, read_by, is_system, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                sender.to_string(),
                message.content,
                serde_json::to_string(&message.read_by)?,
                now.to_rfc3339(),
            ],
        )?;

        let recipient_id = m.counterpart_of(sender);
        bump_unread(&tx, chat.id, &[recipient_id], now)?;

        tx.execute(
            "UPDATE matches SET last_activity_at = ?2 WHERE id = ?1",
            params![match_id.to_string(), now.to_rfc3339()],
        )?;

        let sender_nickname = get_user(&tx, sender)?.nickname;

        tx.commit()?;

        Ok(SendOutcome {
            message,
            match_id,
            recipient_id,
            sender_nickname,
        })
    }

    /// Return the last `limit` messages of a match's chat in chronological
    /// order, marking each as read by the caller and zeroing the caller's
    /// unread counter.  Works in every match state so archived threads
    /// stay readable; the match row is returned alongside so the caller
    /// can render status and cancellation info.
    pub fn list_messages(
        &mut self,
        match_id: Uuid,
        caller: Uuid,
        limit: u32,
    ) -> Result<(Vec<Message>, Match)> {
        let tx = self.write_tx()?;

        let m = get_match(&tx, match_id)?;
        if !m.has_participant(caller) {
            return Err(StoreError::NotParticipant);
        }

        let chat = get_chat_by_match(&tx, match_id)?;

        let mut messages = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE chat_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![chat.id.to_string(), limit], row_to_message)?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            messages
        };
        messages.reverse();

        // Read receipts for everything the caller just saw.
        for message in &mut messages {
            if !message.read_by.contains(&caller) {
                message.read_by.push(caller);
                tx.execute(
                    "UPDATE messages SET read_by = ?2 WHERE id = ?1",
                    params![
                        message.id.to_string(),
                        serde_json::to_string(&message.read_by)?,
                    ],
                )?;
            }
        }

        zero_unread(&tx, chat.id, caller)?;

        tx.commit()?;

        Ok((messages, m))
    }
}

/// Append a cascade-generated system message.  Bypasses the active-state
/// check; system messages land in archived threads by design of the
/// archival flow.
pub(crate) fn append_system_message(
    conn: &Connection,
    chat_id: Uuid,
    content: &str,
    at: DateTime<Utc>,
) -> Result<Message> {
    let message = Message {
        id: Uuid::new_v4(),
        chat_id,
        sender_id: None,
        content: content.to_string(),
        read_by: Vec::new(),
        is_system: true,
        created_at: at,
    };

    conn.execute(
        "INSERT INTO messages (id, chat_id, sender_id, content, read_by, is_system, created_at)
         VALUES (?1, ?2, NULL, ?3, '[]', 1, ?4)",
        params![
            message.id.to_string(),
            chat_id.to_string(),
            message.content,
            at.to_rfc3339(),
        ],
    )?;

    Ok(message)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: col_uuid(row, 0)?,
        chat_id: col_uuid(row, 1)?,
        sender_id: col_uuid_opt(row, 2)?,
        content: row.get(3)?,
        read_by: col_json(row, 4)?,
        is_system: row.get(5)?,
        created_at: col_ts(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{db, matched_pair};

    #[test]
    fn send_and_read_with_unread_accounting() {
        let (_dir, mut db) = db();
        let (formation, alice, bob, ..) = matched_pair(&mut db);

        let out = db
            .send_message(formation.match_id, alice, "hi! still up for the swap?")
            .unwrap();
        assert_eq!(out.recipient_id, bob);
        assert_eq!(out.message.read_by, vec![alice]);

        let chat = db.get_chat(formation.match_id).unwrap();
        assert_eq!(chat.unread_for(bob), 1);
        assert_eq!(chat.unread_for(alice), 0);

        let (messages, m) = db.list_messages(formation.match_id, bob, 100).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].read_by.contains(&bob));
        assert_eq!(m.id, formation.match_id);

        let chat = db.get_chat(formation.match_id).unwrap();
        assert_eq!(chat.unread_for(bob), 0);
    }

    #[test]
    fn non_active_match_rejects_user_messages_but_stays_readable() {
        let (_dir, mut db) = db();
        let (formation, alice, bob, ..) = matched_pair(&mut db);

        db.send_message(formation.match_id, alice, "see you saturday")
            .unwrap();
        db.cancel_match(formation.match_id, bob, None).unwrap();

        assert!(matches!(
            db.send_message(formation.match_id, alice, "wait"),
            Err(StoreError::MatchNotActive)
        ));

        // Reading still works and reports the cancellation.
        let (messages, m) = db.list_messages(formation.match_id, alice, 100).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(m.cancellation.unwrap().by, bob);

        // System messages still land.
        let chat = db.get_chat(formation.match_id).unwrap();
        append_system_message(db.conn(), chat.id, "archived", Utc::now()).unwrap();
        let (messages, _) = db.list_messages(formation.match_id, alice, 100).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn message_content_is_bounded() {
        let (_dir, mut db) = db();
        let (formation, alice, ..) = matched_pair(&mut db);

        assert!(matches!(
            db.send_message(formation.match_id, alice, "   "),
            Err(StoreError::InvalidMessage(_))
        ));

        let oversized = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            db.send_message(formation.match_id, alice, &oversized),
            Err(StoreError::InvalidMessage(_))
        ));
    }

    #[test]
    fn listing_returns_newest_page_in_order() {
        let (_dir, mut db) = db();
        let (formation, alice, bob, ..) = matched_pair(&mut db);

        for i in 0..5 {
            let sender = if i % 2 == 0 { alice } else { bob };
            db.send_message(formation.match_id, sender, &format!("message {i}"))
                .unwrap();
        }

        let (messages, _) = db.list_messages(formation.match_id, alice, 3).unwrap();
        assert_eq!(messages.len(), 3);
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["message 2", "message 3", "message 4"]);
    }
}
