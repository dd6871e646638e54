//! # swesh-store
//!
//! Persistence layer for the Swesh clothing-swap backend, backed by
//! SQLite.  The crate exposes a synchronous [`Database`] handle that wraps
//! a `rusqlite::Connection` and provides every lifecycle operation as a
//! transactional method: the proposal ledger, the daily rate counter, the
//! match resolver, the confirmation handshake with its completion cascade,
//! and the chat thread operations.
//!
//! Uniqueness guarantees (one pending proposal per triple, one match per
//! user/item 4-tuple, one chat per match) live in the schema, so races are
//! arbitrated by SQLite even when multiple server processes share the
//! database file.

pub mod chats;
pub mod database;
pub mod exchange;
pub mod interactions;
pub mod items;
pub mod matches;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod proposals;
pub mod rate_limit;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use exchange::{ArchivedMatchNote, CompletionReport, CompletionSide, ConfirmOutcome};
pub use interactions::InteractionOutcome;
pub use items::ItemDeletionReport;
pub use matches::{group_by_counterpart, MatchFormation, MatchGroup};
pub use messages::SendOutcome;
pub use models::*;

#[cfg(test)]
pub(crate) mod test_util {
    use uuid::Uuid;

    use swesh_core::{ItemCategory, ItemCondition, ItemSize};

    use crate::matches::MatchFormation;
    use crate::models::NewItem;
    use crate::Database;

    pub fn db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    pub fn user(db: &Database, nickname: &str) -> Uuid {
        db.create_user(nickname, None).unwrap().id
    }

    pub fn item(db: &Database, owner: Uuid, title: &str) -> Uuid {
        db.create_item(
            owner,
            NewItem {
                title: title.to_string(),
                description: String::new(),
                images: Vec::new(),
                size: ItemSize::M,
                category: ItemCategory::Tops,
                condition: ItemCondition::Good,
            },
        )
        .unwrap()
        .id
    }

    /// Two users, two items, one active proposal-type match between them.
    /// Returns (formation, alice, bob, jacket, boots) where alice owns the
    /// jacket and bob owns the boots.
    pub fn matched_pair(db: &mut Database) -> (MatchFormation, Uuid, Uuid, Uuid, Uuid) {
        let alice = user(db, "alice");
        let bob = user(db, "bob");
        let jacket = item(db, alice, "Jacket");
        let boots = item(db, bob, "Boots");

        let first = db.submit_proposal(alice, boots, jacket).unwrap();
        assert!(db.resolve_proposal_match(&first).unwrap().is_none());
        let second = db.submit_proposal(bob, jacket, boots).unwrap();
        let formation = db.resolve_proposal_match(&second).unwrap().unwrap();

        (formation, alice, bob, jacket, boots)
    }
}
