//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the
//! HTTP layer as a JSON response body.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use swesh_core::{
    ArchivalReason, Confirmation, InteractionAction, ItemCategory, ItemCondition, ItemSize,
    MatchStatus, MatchType, ProposalStatus,
};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique user identifier.
    pub id: Uuid,
    /// Display name shown to counterparts.
    pub nickname: String,
    /// Avatar id from the avatar catalog (served elsewhere).
    pub avatar: Option<String>,
    /// Number of exchanges this user has completed.
    pub completed_exchanges_count: i64,
    /// When the profile was created.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A listed clothing item.
///
/// Once traded, `is_available` flips to false and the exchange metadata
/// records which match retired it; items are never resurrected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    /// References into external image storage.
    pub images: Vec<String>,
    pub size: ItemSize,
    pub category: ItemCategory,
    pub condition: ItemCondition,
    pub is_available: bool,
    pub exchanged_at: Option<DateTime<Utc>>,
    pub exchanged_in_match_id: Option<Uuid>,
    pub exchanged_with: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the owner when listing an item.
#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub size: ItemSize,
    pub category: ItemCategory,
    pub condition: ItemCondition,
}

// ---------------------------------------------------------------------------
// Interaction
// ---------------------------------------------------------------------------

/// A user's reaction to an item.  At most one row per (user, item); a later
/// action overwrites the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Interaction {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub action: InteractionAction,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// A unilateral offer: "my `offered_item` for your `target_item`".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    pub id: Uuid,
    pub proposer_id: Uuid,
    pub target_owner_id: Uuid,
    pub target_item_id: Uuid,
    pub offered_item_id: Uuid,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

/// Who cancelled an archived match, when, and why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cancellation {
    pub by: Uuid,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Why and when a match was archived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Archival {
    pub reason: ArchivalReason,
    /// For `item_exchanged`: the match whose completion caused this one to
    /// be archived.
    pub related_match_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// A canonical pairing of two users and their two traded items.
///
/// `user_a` is always the smaller of the two user ids, and `item_a` is the
/// item `user_a` brought into the match, regardless of whose action
/// triggered resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Match {
    pub id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub item_a: Uuid,
    pub item_b: Uuid,
    pub status: MatchStatus,
    pub match_type: MatchType,
    pub chat_id: Option<Uuid>,
    pub last_activity_at: DateTime<Utc>,
    pub confirmation: Confirmation,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancellation: Option<Cancellation>,
    pub archival: Option<Archival>,
    pub created_at: DateTime<Utc>,
}

impl Match {
    /// True when `user_id` is one of the two participants.
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// The other participant, given one of the two.
    pub fn counterpart_of(&self, user_id: Uuid) -> Uuid {
        if self.user_a == user_id {
            self.user_b
        } else {
            self.user_a
        }
    }

    /// The item `user_id` brought into the match.
    pub fn item_of(&self, user_id: Uuid) -> Uuid {
        if self.user_a == user_id {
            self.item_a
        } else {
            self.item_b
        }
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// The conversation thread attached to a match (always exactly one).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: Uuid,
    pub match_id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Unread message count per participant.
    pub unread_counts: BTreeMap<Uuid, i64>,
}

impl Chat {
    /// The caller's unread count (zero when absent).
    pub fn unread_for(&self, user_id: Uuid) -> i64 {
        self.unread_counts.get(&user_id).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.  System messages have no sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub content: String,
    /// Users who have read this message.
    pub read_by: Vec<Uuid>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Match listing
// ---------------------------------------------------------------------------

/// One row of a user's match list, joined with counterpart and item info.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MatchSummary {
    pub match_id: Uuid,
    pub chat_id: Option<Uuid>,
    pub status: MatchStatus,
    pub match_type: MatchType,
    pub counterpart_id: Uuid,
    pub counterpart_nickname: String,
    pub my_item_title: String,
    pub their_item_title: String,
    pub unread_count: i64,
    pub last_activity_at: DateTime<Utc>,
}
