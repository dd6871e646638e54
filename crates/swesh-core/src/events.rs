//! Realtime event payloads pushed to connected clients.
//!
//! Events are addressed to rooms.  Two room families exist: `user:{id}` for
//! out-of-band notifications a user should see anywhere in the app, and
//! `chat:{match_id}` for in-conversation events.  The transport only needs
//! to fan a serialized event out to a room's subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ArchivalReason, Confirmation, MatchStatus, MatchType};

/// Room carrying a user's out-of-band notifications.
pub fn user_room(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

/// Room carrying a match's in-conversation events.
pub fn chat_room(match_id: Uuid) -> String {
    format!("chat:{match_id}")
}

/// A chat message as delivered over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: Uuid,
    pub chat_id: Uuid,
    /// `None` for system messages.
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

/// Every event the backend emits over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A message was posted in a chat.  Room: `chat:{match_id}`.
    NewMessage {
        match_id: Uuid,
        message: MessagePayload,
    },

    /// A participant is typing.  Room: `chat:{match_id}`.
    UserTyping { match_id: Uuid, user_id: Uuid },

    /// The match's confirmation state changed.  Room: `chat:{match_id}`.
    ExchangeStatus {
        match_id: Uuid,
        status: MatchStatus,
        confirmation: Confirmation,
    },

    /// Out-of-band "you have a new message" ping for the recipient.
    /// Room: `user:{recipient_id}`.
    NewMessageNotification {
        match_id: Uuid,
        chat_id: Uuid,
        sender_nickname: String,
        preview: String,
    },

    /// A new match was formed.  Room: `user:{id}` of both participants.
    NewMatch {
        match_id: Uuid,
        chat_id: Uuid,
        match_type: MatchType,
    },

    /// One of the recipient's matches was archived out from under them.
    /// Room: `user:{id}` of both affected participants.
    MatchArchived {
        match_id: Uuid,
        reason: ArchivalReason,
        related_match_id: Option<Uuid>,
        item_title: String,
    },

    /// An exchange the recipient took part in completed.  Personalized per
    /// recipient.  Room: `user:{participant_id}`.
    ExchangeCompleted {
        match_id: Uuid,
        my_item_title: String,
        their_item_title: String,
        other_user_nickname: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_names() {
        let id = Uuid::nil();
        assert_eq!(user_room(id), format!("user:{id}"));
        assert_eq!(chat_room(id), format!("chat:{id}"));
    }

    #[test]
    fn events_tag_by_name() {
        let event = RealtimeEvent::UserTyping {
            match_id: Uuid::nil(),
            user_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "user_typing");
    }
}
