//! The exchange confirmation handshake and its completion cascade.
//!
//! A match completes when both participants confirm the physical exchange.
//! Completion retires both items, credits both users, and archives every
//! other active match competing for either item.  All of it happens in the
//! one transaction that flips the match to `completed`, so a crash can
//! never leave an item retired without its match completed or vice versa.
//!
//! The cascade returns a report instead of emitting notifications itself;
//! the server publishes events from the report after commit, so delivery
//! never gates persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use swesh_core::{ArchivalReason, Confirmation, MatchStatus};

use crate::chats::{bump_unread, get_chat_by_match};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::items::{get_item, mark_exchanged};
use crate::matches::{active_matches_referencing, get_match};
use crate::messages::append_system_message;
use crate::models::Match;
use crate::users::{get_user, increment_completed_exchanges};

/// A match archived by the cascade, with everything the server needs to
/// notify its participants.
#[derive(Debug, Clone, Serialize)]
pub struct ArchivedMatchNote {
    pub match_id: Uuid,
    pub chat_id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub reason: ArchivalReason,
    /// For `item_exchanged`: the completed match that caused the archival.
    pub related_match_id: Option<Uuid>,
    /// Title of the item that was exchanged (or deleted) out from under
    /// this match.
    pub item_title: String,
}

/// One participant's personalized view of a completed exchange.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionSide {
    pub user_id: Uuid,
    pub my_item_title: String,
    pub their_item_title: String,
    pub other_user_nickname: String,
}

/// Everything the completion cascade did.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub match_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub sides: [CompletionSide; 2],
    pub archived: Vec<ArchivedMatchNote>,
}

/// Result of a confirmation call: the post-update state, plus the cascade
/// report when this call was the one that completed the match.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmOutcome {
    pub match_id: Uuid,
    pub status: MatchStatus,
    pub confirmation: Confirmation,
    pub completion: Option<CompletionReport>,
}

impl Database {
    /// Record `acting_user`'s confirmation of the exchange.
    ///
    /// Idempotent per side: re-confirming refreshes the timestamp only.
    /// The both-sides check runs against the post-update row, and the
    /// transition to `completed` is a conditional update, so the cascade
    /// fires exactly once even when both confirmations race.
    pub fn confirm_exchange(&mut self, match_id: Uuid, acting_user: Uuid) -> Result<ConfirmOutcome> {
        let tx = self.write_tx()?;

        let m = get_match(&tx, match_id)?;
        if !m.has_participant(acting_user) {
            return Err(StoreError::NotParticipant);
        }
        if m.status != MatchStatus::Active {
            return Err(StoreError::MatchNotActive);
        }

        let now = Utc::now();
        let sql = if acting_user == m.user_a {
            "UPDATE matches SET user_a_confirmed = 1, user_a_confirmed_at = ?2,
             last_activity_at = ?2 WHERE id = ?1"
        } else {
            "UPDATE matches SET user_b_confirmed = 1, user_b_confirmed_at = ?2,
             last_activity_at = ?2 WHERE id = ?1"
        };
        tx.execute(sql, params![match_id.to_string(), now.to_rfc3339()])?;

        // Decide completion on the row as it is now, not as it was read.
        let updated = get_match(&tx, match_id)?;
        let completion = if updated.confirmation.is_complete() {
            let affected = tx.execute(
                "UPDATE matches SET status = 'completed', completed_at = ?2
                 WHERE id = ?1 AND status = 'active'",
                params![match_id.to_string(), now.to_rfc3339()],
            )?;
            if affected == 1 {
                Some(run_completion_cascade(&tx, &updated, now)?)
            } else {
                None
            }
        } else {
            None
        };

        let final_row = get_match(&tx, match_id)?;
        tx.commit()?;

        tracing::info!(
            match_id = %match_id,
            user = %acting_user,
            status = %final_row.status,
            "exchange confirmation recorded"
        );

        Ok(ConfirmOutcome {
            match_id,
            status: final_row.status,
            confirmation: final_row.confirmation,
            completion,
        })
    }

    /// Cancel an active match.  The match is archived with reason
    /// `user_cancelled`; items and counters are untouched -- cancellation
    /// is not a completion.
    pub fn cancel_match(
        &mut self,
        match_id: Uuid,
        acting_user: Uuid,
        reason: Option<&str>,
    ) -> Result<Match> {
        let tx = self.write_tx()?;

        let m = get_match(&tx, match_id)?;
        if !m.has_participant(acting_user) {
            return Err(StoreError::NotParticipant);
        }
        if m.status != MatchStatus::Active {
            return Err(StoreError::MatchNotActive);
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE matches
             SET status = 'archived', cancelled_by = ?2, cancelled_at = ?3, cancel_reason = ?4,
                 archival_reason = 'user_cancelled', archived_at = ?3, last_activity_at = ?3
             WHERE id = ?1 AND status = 'active'",
            params![match_id.to_string(), acting_user.to_string(), now, reason],
        )?;

        let cancelled = get_match(&tx, match_id)?;
        tx.commit()?;

        tracing::info!(match_id = %match_id, by = %acting_user, "match cancelled");

        Ok(cancelled)
    }
}

/// The completion cascade.  Runs inside the transaction that just flipped
/// `m` to completed; `m` is the pre-transition row (participants and items
/// are immutable, so the stale status does not matter).
fn run_completion_cascade(
    conn: &Connection,
    m: &Match,
    now: DateTime<Utc>,
) -> Result<CompletionReport> {
    let item_a = get_item(conn, m.item_a)?;
    let item_b = get_item(conn, m.item_b)?;

    // 1. Retire both traded items.
    mark_exchanged(conn, m.item_a, m.id, m.user_b, now)?;
    mark_exchanged(conn, m.item_b, m.id, m.user_a, now)?;

    // 2. Credit both participants.
    increment_completed_exchanges(conn, m.user_a)?;
    increment_completed_exchanges(conn, m.user_b)?;

    // 3+4. Archive every other active match competing for either item.
    let mut archived = Vec::new();
    for competing in active_matches_referencing(conn, &[m.item_a, m.item_b])? {
        let exchanged_item =
            if competing.item_a == m.item_a || competing.item_b == m.item_a {
                &item_a
            } else {
                &item_b
            };
        archived.push(archive_match(
            conn,
            &competing,
            ArchivalReason::ItemExchanged,
            Some(m.id),
            &exchanged_item.title,
        )?);
    }

    // 5. Personalized completion entries for the two participants.
    let nick_a = get_user(conn, m.user_a)?.nickname;
    let nick_b = get_user(conn, m.user_b)?.nickname;
    let sides = [
        CompletionSide {
            user_id: m.user_a,
            my_item_title: item_a.title.clone(),
            their_item_title: item_b.title.clone(),
            other_user_nickname: nick_b,
        },
        CompletionSide {
            user_id: m.user_b,
            my_item_title: item_b.title.clone(),
            their_item_title: item_a.title.clone(),
            other_user_nickname: nick_a,
        },
    ];

    tracing::info!(
        match_id = %m.id,
        archived = archived.len(),
        "exchange completed"
    );

    Ok(CompletionReport {
        match_id: m.id,
        completed_at: now,
        sides,
        archived,
    })
}

/// Archive one match out from under its participants: status change plus a
/// system message in its chat and an unread bump for both sides.
pub(crate) fn archive_match(
    conn: &Connection,
    m: &Match,
    reason: ArchivalReason,
    related_match_id: Option<Uuid>,
    item_title: &str,
) -> Result<ArchivedMatchNote> {
    let now = Utc::now();

    conn.execute(
        "UPDATE matches
         SET status = 'archived', archival_reason = ?2, archival_related_match_id = ?3,
             archived_at = ?4, last_activity_at = ?4
         WHERE id = ?1 AND status = 'active'",
        params![
            m.id.to_string(),
            reason.as_str(),
            related_match_id.map(|id| id.to_string()),
            now.to_rfc3339(),
        ],
    )?;

    let chat = get_chat_by_match(conn, m.id)?;
    let content = match reason {
        ArchivalReason::ItemExchanged => format!(
            "\"{item_title}\" was exchanged in another match. This match has been archived."
        ),
        ArchivalReason::ItemDeleted => {
            format!("\"{item_title}\" was removed by its owner. This match has been archived.")
        }
        _ => "This match has been archived.".to_string(),
    };
    append_system_message(conn, chat.id, &content, now)?;
    bump_unread(conn, chat.id, &[m.user_a, m.user_b], now)?;

    Ok(ArchivedMatchNote {
        match_id: m.id,
        chat_id: chat.id,
        user_a: m.user_a,
        user_b: m.user_b,
        reason,
        related_match_id,
        item_title: item_title.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{db, item, matched_pair, user};
    use swesh_core::MatchType;

    #[test]
    fn outsiders_cannot_confirm() {
        let (_dir, mut db) = db();
        let (formation, ..) = matched_pair(&mut db);
        let mallory = user(&db, "mallory");

        assert!(matches!(
            db.confirm_exchange(formation.match_id, mallory),
            Err(StoreError::NotParticipant)
        ));
    }

    #[test]
    fn one_side_confirming_keeps_the_match_active() {
        let (_dir, mut db) = db();
        let (formation, alice, ..) = matched_pair(&mut db);

        let out = db.confirm_exchange(formation.match_id, alice).unwrap();
        assert_eq!(out.status, MatchStatus::Active);
        assert!(out.completion.is_none());

        let confirmed_sides = [
            out.confirmation.user_a_confirmed,
            out.confirmation.user_b_confirmed,
        ];
        assert_eq!(confirmed_sides.iter().filter(|c| **c).count(), 1);
    }

    #[test]
    fn reconfirming_the_same_side_is_idempotent() {
        let (_dir, mut db) = db();
        let (formation, alice, ..) = matched_pair(&mut db);

        db.confirm_exchange(formation.match_id, alice).unwrap();
        let out = db.confirm_exchange(formation.match_id, alice).unwrap();

        assert_eq!(out.status, MatchStatus::Active);
        assert!(out.completion.is_none());
    }

    #[test]
    fn both_sides_complete_the_match_once() {
        let (_dir, mut db) = db();
        let (formation, alice, bob, jacket, boots) = matched_pair(&mut db);

        db.confirm_exchange(formation.match_id, alice).unwrap();
        let out = db.confirm_exchange(formation.match_id, bob).unwrap();

        assert_eq!(out.status, MatchStatus::Completed);
        let report = out.completion.expect("second confirmation completes");
        assert_eq!(report.match_id, formation.match_id);

        // Items retired with exchange metadata.
        for (item_id, new_owner_side) in [(jacket, bob), (boots, alice)] {
            let item = db.get_item(item_id).unwrap();
            assert!(!item.is_available);
            assert_eq!(item.exchanged_in_match_id, Some(formation.match_id));
            assert_eq!(item.exchanged_with, Some(new_owner_side));
            assert!(item.exchanged_at.is_some());
        }

        // Counters credited exactly once.
        assert_eq!(db.get_user(alice).unwrap().completed_exchanges_count, 1);
        assert_eq!(db.get_user(bob).unwrap().completed_exchanges_count, 1);

        // A third confirmation hits the terminal-state guard.
        assert!(matches!(
            db.confirm_exchange(formation.match_id, alice),
            Err(StoreError::MatchNotActive)
        ));
    }

    #[test]
    fn completion_archives_competing_matches_only() {
        let (_dir, mut db) = db();
        let (formation, alice, bob, jacket, _boots) = matched_pair(&mut db);

        // carol also wants alice's jacket.
        let carol = user(&db, "carol");
        let coat = item(&db, carol, "Coat");
        let (competing, _) = crate::matches::insert_match_or_recover(
            db.conn(),
            alice,
            jacket,
            carol,
            coat,
            MatchType::Proposal,
        )
        .unwrap();

        // A completely unrelated match between carol and dave.
        let dave = user(&db, "dave");
        let hat = item(&db, dave, "Hat");
        let scarf = item(&db, carol, "Scarf");
        let (unrelated, _) = crate::matches::insert_match_or_recover(
            db.conn(),
            dave,
            hat,
            carol,
            scarf,
            MatchType::Proposal,
        )
        .unwrap();

        db.confirm_exchange(formation.match_id, alice).unwrap();
        let out = db.confirm_exchange(formation.match_id, bob).unwrap();
        let report = out.completion.unwrap();

        assert_eq!(report.archived.len(), 1);
        let note = &report.archived[0];
        assert_eq!(note.match_id, competing.id);
        assert_eq!(note.reason, ArchivalReason::ItemExchanged);
        assert_eq!(note.related_match_id, Some(formation.match_id));
        assert_eq!(note.item_title, "Jacket");

        let archived = db.get_match(competing.id).unwrap();
        assert_eq!(archived.status, MatchStatus::Archived);
        let archival = archived.archival.unwrap();
        assert_eq!(archival.reason, ArchivalReason::ItemExchanged);
        assert_eq!(archival.related_match_id, Some(formation.match_id));

        // The archived chat carries a system message and unread bumps.
        let chat = db.get_chat(competing.id).unwrap();
        assert_eq!(chat.unread_for(alice), 1);
        assert_eq!(chat.unread_for(carol), 1);
        let (messages, _) = db.list_messages(competing.id, carol, 100).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_system);
        assert!(messages[0].content.contains("Jacket"));

        // The unrelated match is untouched.
        assert_eq!(
            db.get_match(unrelated.id).unwrap().status,
            MatchStatus::Active
        );
        // Carol's own items were not retired.
        assert!(db.get_item(coat).unwrap().is_available);
    }

    #[test]
    fn cancellation_archives_without_side_effects() {
        let (_dir, mut db) = db();
        let (formation, alice, bob, jacket, boots) = matched_pair(&mut db);

        let cancelled = db
            .cancel_match(formation.match_id, bob, Some("changed my mind"))
            .unwrap();
        assert_eq!(cancelled.status, MatchStatus::Archived);
        let cancellation = cancelled.cancellation.unwrap();
        assert_eq!(cancellation.by, bob);
        assert_eq!(cancellation.reason.as_deref(), Some("changed my mind"));
        assert_eq!(
            cancelled.archival.unwrap().reason,
            ArchivalReason::UserCancelled
        );

        // No completion side effects.
        assert!(db.get_item(jacket).unwrap().is_available);
        assert!(db.get_item(boots).unwrap().is_available);
        assert_eq!(db.get_user(alice).unwrap().completed_exchanges_count, 0);

        // Terminal: neither confirmation nor a second cancel may follow.
        assert!(matches!(
            db.confirm_exchange(formation.match_id, alice),
            Err(StoreError::MatchNotActive)
        ));
        assert!(matches!(
            db.cancel_match(formation.match_id, alice, None),
            Err(StoreError::MatchNotActive)
        ));
    }
}
