//! Match resolution and listing.
//!
//! Two independent, asynchronous actions (a proposal and its reciprocal,
//! or a like and its reciprocal) collapse into exactly one canonical Match
//! row.  Canonical means: `user_a` is the smaller user id and `item_a` is
//! user_a's item, whichever direction triggered resolution.  The UNIQUE
//! constraint on the 4-tuple arbitrates concurrent resolutions; losing the
//! race means adopting the winner's row, never erroring.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use swesh_core::{ArchivalReason, Confirmation, MatchStatus, MatchType};

use crate::chats::{create_chat, get_chat_by_match};
use crate::database::{col_enum, col_ts, col_ts_opt, col_uuid, col_uuid_opt, Database};
use crate::error::{Result, StoreError};
use crate::items::get_item;
use crate::models::{Archival, Cancellation, Chat, Match, MatchSummary, Proposal};
use crate::proposals::{find_reciprocal, mark_matched};
use crate::users::get_user;

pub(crate) const MATCH_COLS: &str = "id, user_a, user_b, item_a, item_b, status, match_type, \
     chat_id, last_activity_at, user_a_confirmed, user_a_confirmed_at, user_b_confirmed, \
     user_b_confirmed_at, completed_at, cancelled_by, cancelled_at, cancel_reason, \
     archival_reason, archival_related_match_id, archived_at, created_at";

/// The outcome of a successful resolution: a Match plus its Chat.
#[derive(Debug, Clone, Serialize)]
pub struct MatchFormation {
    pub match_id: Uuid,
    pub chat_id: Uuid,
    pub match_type: MatchType,
    pub user_a: Uuid,
    pub user_b: Uuid,
}

/// One entry of the counterpart-grouped match list.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MatchGroup {
    pub user_id: Uuid,
    pub nickname: String,
    pub match_count: usize,
    pub total_unread: i64,
    pub last_activity_at: chrono::DateTime<Utc>,
}

impl Database {
    /// Fetch a single match by id.
    pub fn get_match(&self, id: Uuid) -> Result<Match> {
        get_match(self.conn(), id)
    }

    /// Try to resolve a freshly submitted proposal against its exact
    /// reciprocal.  Returns `None` when no reciprocal is pending, leaving
    /// the proposal in the ledger.
    pub fn resolve_proposal_match(&mut self, proposal: &Proposal) -> Result<Option<MatchFormation>> {
        let tx = self.write_tx()?;

        let Some(reciprocal) = find_reciprocal(&tx, proposal)? else {
            return Ok(None);
        };

        // An item retired between submission and resolution disqualifies
        // the pair; both proposals stay pending for the expiry sweep.
        let offered = get_item(&tx, proposal.offered_item_id)?;
        let target = get_item(&tx, proposal.target_item_id)?;
        if !offered.is_available || !target.is_available {
            return Ok(None);
        }

        mark_matched(&tx, [proposal.id, reciprocal.id])?;

        let (match_row, chat) = insert_match_or_recover(
            &tx,
            proposal.proposer_id,
            proposal.offered_item_id,
            proposal.target_owner_id,
            proposal.target_item_id,
            MatchType::Proposal,
        )?;

        tx.commit()?;

        tracing::info!(
            match_id = %match_row.id,
            proposal = %proposal.id,
            reciprocal = %reciprocal.id,
            "reciprocal proposals resolved into a match"
        );

        Ok(Some(MatchFormation {
            match_id: match_row.id,
            chat_id: chat.id,
            match_type: match_row.match_type,
            user_a: match_row.user_a,
            user_b: match_row.user_b,
        }))
    }

    /// All matches the user participates in, newest activity first.
    pub fn list_matches(&self, user_id: Uuid) -> Result<Vec<MatchSummary>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MATCH_COLS} FROM matches
             WHERE user_a = ?1 OR user_b = ?1
             ORDER BY last_activity_at DESC"
        ))?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_match)?;

        let mut summaries = Vec::new();
        for row in rows {
            let m = row?;
            let counterpart_id = m.counterpart_of(user_id);
            let counterpart = get_user(self.conn(), counterpart_id)?;
            let my_item_title = item_title_or_placeholder(self.conn(), m.item_of(user_id))?;
            let their_item_title =
                item_title_or_placeholder(self.conn(), m.item_of(counterpart_id))?;
            let unread_count = match m.chat_id {
                Some(_) => get_chat_by_match(self.conn(), m.id)?.unread_for(user_id),
                None => 0,
            };

            summaries.push(MatchSummary {
                match_id: m.id,
                chat_id: m.chat_id,
                status: m.status,
                match_type: m.match_type,
                counterpart_id,
                counterpart_nickname: counterpart.nickname,
                my_item_title,
                their_item_title,
                unread_count,
                last_activity_at: m.last_activity_at,
            });
        }
        Ok(summaries)
    }
}

/// Fold a match list into one entry per counterpart, with aggregate
/// match and unread counts.
pub fn group_by_counterpart(summaries: &[MatchSummary]) -> Vec<MatchGroup> {
    let mut groups: Vec<MatchGroup> = Vec::new();
    for s in summaries {
        match groups.iter_mut().find(|g| g.user_id == s.counterpart_id) {
            Some(g) => {
                g.match_count += 1;
                g.total_unread += s.unread_count;
                if s.last_activity_at > g.last_activity_at {
                    g.last_activity_at = s.last_activity_at;
                }
            }
            None => groups.push(MatchGroup {
                user_id: s.counterpart_id,
                nickname: s.counterpart_nickname.clone(),
                match_count: 1,
                total_unread: s.unread_count,
                last_activity_at: s.last_activity_at,
            }),
        }
    }
    groups.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
    groups
}

/// Deterministic assignment of the `a`/`b` sides from an unordered pair.
/// Symmetric: both call directions produce the same tuple.
fn canonical_sides(
    user_x: Uuid,
    item_x: Uuid,
    user_y: Uuid,
    item_y: Uuid,
) -> (Uuid, Uuid, Uuid, Uuid) {
    if user_x < user_y {
        (user_x, item_x, user_y, item_y)
    } else {
        (user_y, item_y, user_x, item_x)
    }
}

/// Insert the canonical match row, or adopt the existing one when a
/// concurrent resolution already inserted it.  Either way the match ends
/// up with its chat created and linked.
pub(crate) fn insert_match_or_recover(
    conn: &Connection,
    user_x: Uuid,
    item_x: Uuid,
    user_y: Uuid,
    item_y: Uuid,
    match_type: MatchType,
) -> Result<(Match, Chat)> {
    let (user_a, item_a, user_b, item_b) = canonical_sides(user_x, item_x, user_y, item_y);

    let id = Uuid::new_v4();
    let now = Utc::now();

    let inserted = conn.execute(
        "INSERT INTO matches (id, user_a, user_b, item_a, item_b, status, match_type,
                              last_activity_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?7)",
        params![
            id.to_string(),
            user_a.to_string(),
            user_b.to_string(),
            item_a.to_string(),
            item_b.to_string(),
            match_type.as_str(),
            now.to_rfc3339(),
        ],
    );

    let match_id = match inserted {
        Ok(_) => id,
        Err(e) => {
            let wrapped = StoreError::Sqlite(e);
            if !wrapped.is_unique_violation() {
                return Err(wrapped);
            }
            // Duplicate-key race: adopt the row the other resolution made.
            conn.query_row(
                "SELECT id FROM matches
                 WHERE user_a = ?1 AND user_b = ?2 AND item_a = ?3 AND item_b = ?4",
                params![
                    user_a.to_string(),
                    user_b.to_string(),
                    item_a.to_string(),
                    item_b.to_string(),
                ],
                |row| col_uuid(row, 0),
            )
            .map_err(StoreError::Sqlite)?
        }
    };

    // Lazily attach the chat if it is not there yet.
    let chat = match get_chat_by_match(conn, match_id) {
        Ok(chat) => chat,
        Err(StoreError::NotFound) => {
            let chat = create_chat(conn, match_id, user_a, user_b)?;
            conn.execute(
                "UPDATE matches SET chat_id = ?2 WHERE id = ?1",
                params![match_id.to_string(), chat.id.to_string()],
            )?;
            chat
        }
        Err(other) => return Err(other),
    };

    let match_row = get_match(conn, match_id)?;
    Ok((match_row, chat))
}

/// The tinder-style resolver: `liker` just liked `target_item`.  A match
/// forms when the target's owner has a live like on one of the liker's
/// available items (most recent like wins).
pub(crate) fn resolve_like(
    conn: &Connection,
    liker: Uuid,
    target_item: &crate::models::Item,
) -> Result<Option<MatchFormation>> {
    if !target_item.is_available {
        return Ok(None);
    }

    let mine: Option<Uuid> = conn
        .query_row(
            "SELECT i.id FROM interactions x
             JOIN items i ON i.id = x.item_id
             WHERE x.user_id = ?1
               AND x.action = 'like'
               AND i.owner_id = ?2
               AND i.is_available = 1
             ORDER BY x.updated_at DESC
             LIMIT 1",
            params![target_item.owner_id.to_string(), liker.to_string()],
            |row| col_uuid(row, 0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::Sqlite(other)),
        })?;

    let Some(my_item_id) = mine else {
        return Ok(None);
    };

    let (match_row, chat) = insert_match_or_recover(
        conn,
        liker,
        my_item_id,
        target_item.owner_id,
        target_item.id,
        MatchType::Tinder,
    )?;

    tracing::info!(
        match_id = %match_row.id,
        liker = %liker,
        "reciprocal likes resolved into a match"
    );

    Ok(Some(MatchFormation {
        match_id: match_row.id,
        chat_id: chat.id,
        match_type: match_row.match_type,
        user_a: match_row.user_a,
        user_b: match_row.user_b,
    }))
}

pub(crate) fn get_match(conn: &Connection, id: Uuid) -> Result<Match> {
    conn.query_row(
        &format!("SELECT {MATCH_COLS} FROM matches WHERE id = ?1"),
        params![id.to_string()],
        row_to_match,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::MatchNotFound,
        other => StoreError::Sqlite(other),
    })
}

/// Active matches referencing any of the given items on either side.
pub(crate) fn active_matches_referencing(
    conn: &Connection,
    item_ids: &[Uuid],
) -> Result<Vec<Match>> {
    let first = item_ids[0].to_string();
    let second = item_ids.get(1).map_or_else(|| first.clone(), Uuid::to_string);

    let mut stmt = conn.prepare(&format!(
        "SELECT {MATCH_COLS} FROM matches
         WHERE status = 'active'
           AND (item_a IN (?1, ?2) OR item_b IN (?1, ?2))
         ORDER BY created_at ASC"
    ))?;

    let rows = stmt.query_map(params![first, second], row_to_match)?;

    let mut matches = Vec::new();
    for row in rows {
        matches.push(row?);
    }
    Ok(matches)
}

fn item_title_or_placeholder(conn: &Connection, item_id: Uuid) -> Result<String> {
    match get_item(conn, item_id) {
        Ok(item) => Ok(item.title),
        Err(StoreError::ItemNotFound) => Ok("(removed item)".to_string()),
        Err(other) => Err(other),
    }
}

pub(crate) fn row_to_match(row: &rusqlite::Row<'_>) -> rusqlite::Result<Match> {
    let cancelled_by = col_uuid_opt(row, 14)?;
    let cancelled_at = col_ts_opt(row, 15)?;
    let cancellation = match (cancelled_by, cancelled_at) {
        (Some(by), Some(at)) => Some(Cancellation {
            by,
            at,
            reason: row.get(16)?,
        }),
        _ => None,
    };

    let archival_reason: Option<String> = row.get(17)?;
    let archival = match archival_reason {
        Some(reason_text) => {
            let reason = ArchivalReason::parse(&reason_text).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    17,
                    rusqlite::types::Type::Text,
                    format!("unrecognized archival reason: {reason_text}").into(),
                )
            })?;
            Some(Archival {
                reason,
                related_match_id: col_uuid_opt(row, 18)?,
                at: col_ts(row, 19)?,
            })
        }
        None => None,
    };

    Ok(Match {
        id: col_uuid(row, 0)?,
        user_a: col_uuid(row, 1)?,
        user_b: col_uuid(row, 2)?,
        item_a: col_uuid(row, 3)?,
        item_b: col_uuid(row, 4)?,
        status: col_enum(row, 5, MatchStatus::parse)?,
        match_type: col_enum(row, 6, MatchType::parse)?,
        chat_id: col_uuid_opt(row, 7)?,
        last_activity_at: col_ts(row, 8)?,
        confirmation: Confirmation {
            user_a_confirmed: row.get(9)?,
            user_a_confirmed_at: col_ts_opt(row, 10)?,
            user_b_confirmed: row.get(11)?,
            user_b_confirmed_at: col_ts_opt(row, 12)?,
        },
        completed_at: col_ts_opt(row, 13)?,
        cancellation,
        archival,
        created_at: col_ts(row, 20)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{db, item, user};
    use swesh_core::ProposalStatus;

    #[test]
    fn reciprocal_proposals_form_exactly_one_match() {
        let (_dir, mut db) = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let jacket = item(&db, alice, "Jacket");
        let boots = item(&db, bob, "Boots");

        let first = db.submit_proposal(alice, boots, jacket).unwrap();
        assert!(db.resolve_proposal_match(&first).unwrap().is_none());

        let second = db.submit_proposal(bob, jacket, boots).unwrap();
        let formation = db
            .resolve_proposal_match(&second)
            .unwrap()
            .expect("reciprocal pair should match");

        let m = db.get_match(formation.match_id).unwrap();
        assert_eq!(m.status, MatchStatus::Active);
        assert_eq!(m.match_type, MatchType::Proposal);
        assert_eq!(m.chat_id, Some(formation.chat_id));

        // Both proposals were consumed.
        assert_eq!(
            db.get_proposal(first.id).unwrap().status,
            ProposalStatus::Matched
        );
        assert_eq!(
            db.get_proposal(second.id).unwrap().status,
            ProposalStatus::Matched
        );
    }

    #[test]
    fn canonical_ordering_is_symmetric() {
        // The side assignment is a pure function of the user ids, so
        // resolving from either direction must produce the same row.
        for flip in [false, true] {
            let (_dir, mut db) = db();
            let alice = user(&db, "alice");
            let bob = user(&db, "bob");
            let jacket = item(&db, alice, "Jacket");
            let boots = item(&db, bob, "Boots");

            let (p1, p2) = if flip {
                (
                    db.submit_proposal(bob, jacket, boots).unwrap(),
                    db.submit_proposal(alice, boots, jacket).unwrap(),
                )
            } else {
                (
                    db.submit_proposal(alice, boots, jacket).unwrap(),
                    db.submit_proposal(bob, jacket, boots).unwrap(),
                )
            };
            assert!(db.resolve_proposal_match(&p1).unwrap().is_none());
            let formation = db.resolve_proposal_match(&p2).unwrap().unwrap();
            let m = db.get_match(formation.match_id).unwrap();

            assert_eq!(m.user_a, alice.min(bob), "user_a is the smaller user id");
            // Each side's item is that side's pre-match property,
            // whichever direction triggered resolution.
            assert_eq!(db.get_item(m.item_a).unwrap().owner_id, m.user_a);
            assert_eq!(db.get_item(m.item_b).unwrap().owner_id, m.user_b);
            assert_eq!(m.item_of(alice), jacket);
            assert_eq!(m.item_of(bob), boots);
        }
    }

    #[test]
    fn partial_overlap_never_matches() {
        let (_dir, mut db) = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let jacket = item(&db, alice, "Jacket");
        let scarf = item(&db, alice, "Scarf");
        let boots = item(&db, bob, "Boots");

        // alice offers Jacket for Boots; bob offers Boots for Scarf.
        // Overlapping on Boots only -- no match.
        let p1 = db.submit_proposal(alice, boots, jacket).unwrap();
        assert!(db.resolve_proposal_match(&p1).unwrap().is_none());
        let p2 = db.submit_proposal(bob, scarf, boots).unwrap();
        assert!(db.resolve_proposal_match(&p2).unwrap().is_none());
    }

    #[test]
    fn duplicate_tuple_recovers_existing_match() {
        let (_dir, db) = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let jacket = item(&db, alice, "Jacket");
        let boots = item(&db, bob, "Boots");

        let (first, chat1) =
            insert_match_or_recover(db.conn(), alice, jacket, bob, boots, MatchType::Proposal)
                .unwrap();
        // Opposite call direction, same unordered pair.
        let (second, chat2) =
            insert_match_or_recover(db.conn(), bob, boots, alice, jacket, MatchType::Tinder)
                .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(chat1.id, chat2.id);
        // The winner's type sticks.
        assert_eq!(second.match_type, MatchType::Proposal);
    }

    #[test]
    fn grouping_aggregates_per_counterpart() {
        let (_dir, db) = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let carol = user(&db, "carol");
        let j1 = item(&db, alice, "Jacket");
        let j2 = item(&db, alice, "Jeans");
        let b1 = item(&db, bob, "Boots");
        let b2 = item(&db, bob, "Beanie");
        let c1 = item(&db, carol, "Coat");

        for (mine, theirs, them) in [(j1, b1, bob), (j2, b2, bob), (j1, c1, carol)] {
            insert_match_or_recover(db.conn(), alice, mine, them, theirs, MatchType::Proposal)
                .unwrap();
        }

        let summaries = db.list_matches(alice).unwrap();
        assert_eq!(summaries.len(), 3);

        let groups = group_by_counterpart(&summaries);
        assert_eq!(groups.len(), 2);
        let bob_group = groups.iter().find(|g| g.user_id == bob).unwrap();
        assert_eq!(bob_group.match_count, 2);
        let carol_group = groups.iter().find(|g| g.user_id == carol).unwrap();
        assert_eq!(carol_group.match_count, 1);
    }
}
