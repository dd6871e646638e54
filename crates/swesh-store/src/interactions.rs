//! Like / dislike / skip records, and the tinder-style match trigger.

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use uuid::Uuid;

use swesh_core::InteractionAction;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::items::get_item;
use crate::matches::{resolve_like, MatchFormation};
use crate::models::Interaction;

/// The result of recording an interaction: the stored record plus the
/// match it formed, when the action was a reciprocal like.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionOutcome {
    pub interaction: Interaction,
    pub match_formed: Option<MatchFormation>,
}

impl Database {
    /// Upsert the caller's reaction to an item.  A later action overwrites
    /// the earlier one for the same (user, item) pair.
    ///
    /// A `like` additionally attempts tinder-style resolution: if the
    /// item's owner already has a live like on one of the caller's
    /// available items, the two likes collapse into a match.
    pub fn record_interaction(
        &mut self,
        user_id: Uuid,
        item_id: Uuid,
        action: InteractionAction,
    ) -> Result<InteractionOutcome> {
        let tx = self.write_tx()?;

        let item = get_item(&tx, item_id)?;
        if item.owner_id == user_id {
            return Err(StoreError::SelfInteraction);
        }

        let interaction = Interaction {
            user_id,
            item_id,
            action,
            updated_at: Utc::now(),
        };

        tx.execute(
            "INSERT INTO interactions (user_id, item_id, action, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, item_id) DO UPDATE
                 SET action = excluded.action, updated_at = excluded.updated_at",
            params![
                user_id.to_string(),
                item_id.to_string(),
                action.as_str(),
                interaction.updated_at.to_rfc3339(),
            ],
        )?;

        let match_formed = if action == InteractionAction::Like {
            resolve_like(&tx, user_id, &item)?
        } else {
            None
        };

        tx.commit()?;

        Ok(InteractionOutcome {
            interaction,
            match_formed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{db, item, user};
    use swesh_core::{MatchStatus, MatchType};

    #[test]
    fn own_items_cannot_be_reacted_to() {
        let (_dir, mut db) = db();
        let alice = user(&db, "alice");
        let jacket = item(&db, alice, "Jacket");

        assert!(matches!(
            db.record_interaction(alice, jacket, InteractionAction::Like),
            Err(StoreError::SelfInteraction)
        ));
    }

    #[test]
    fn later_action_overwrites_earlier_one() {
        let (_dir, mut db) = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let boots = item(&db, bob, "Boots");

        db.record_interaction(alice, boots, InteractionAction::Like)
            .unwrap();
        db.record_interaction(alice, boots, InteractionAction::Dislike)
            .unwrap();

        let (count, action): (i64, String) = db
            .conn()
            .query_row(
                "SELECT COUNT(*), MAX(action) FROM interactions
                 WHERE user_id = ?1 AND item_id = ?2",
                params![alice.to_string(), boots.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(action, "dislike");
    }

    #[test]
    fn reciprocal_likes_form_a_tinder_match() {
        let (_dir, mut db) = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let jacket = item(&db, alice, "Jacket");
        let boots = item(&db, bob, "Boots");

        // bob likes alice's jacket first; nothing to pair with yet.
        let out = db
            .record_interaction(bob, jacket, InteractionAction::Like)
            .unwrap();
        assert!(out.match_formed.is_none());

        // alice likes back.
        let out = db
            .record_interaction(alice, boots, InteractionAction::Like)
            .unwrap();
        let formation = out.match_formed.expect("reciprocal likes should match");
        assert_eq!(formation.match_type, MatchType::Tinder);

        let m = db.get_match(formation.match_id).unwrap();
        assert_eq!(m.status, MatchStatus::Active);
        // Each side's item belongs to that side.
        assert_eq!(db.get_item(m.item_a).unwrap().owner_id, m.user_a);
        assert_eq!(db.get_item(m.item_b).unwrap().owner_id, m.user_b);
        assert_eq!(m.item_of(alice), jacket);
        assert_eq!(m.item_of(bob), boots);
    }

    #[test]
    fn dislikes_and_skips_never_match() {
        let (_dir, mut db) = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let jacket = item(&db, alice, "Jacket");
        let boots = item(&db, bob, "Boots");

        db.record_interaction(bob, jacket, InteractionAction::Like)
            .unwrap();
        let out = db
            .record_interaction(alice, boots, InteractionAction::Skip)
            .unwrap();
        assert!(out.match_formed.is_none());
    }

    #[test]
    fn unavailable_items_do_not_pair() {
        let (_dir, mut db) = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let jacket = item(&db, alice, "Jacket");
        let boots = item(&db, bob, "Boots");

        db.record_interaction(bob, jacket, InteractionAction::Like)
            .unwrap();

        // The jacket is retired before alice likes back.
        crate::items::mark_exchanged(db.conn(), jacket, Uuid::new_v4(), bob, Utc::now()).unwrap();

        let out = db
            .record_interaction(alice, boots, InteractionAction::Like)
            .unwrap();
        assert!(out.match_formed.is_none());
    }
}
