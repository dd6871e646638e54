//! The proposal ledger.
//!
//! A proposal is a unilateral offer of "my item X for your item Y".  The
//! ledger only records offers; finding the reciprocal and forming a match
//! is the resolver's job (see [`crate::matches`]).

use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use swesh_core::ProposalStatus;

use crate::database::{col_enum, col_ts, col_ts_opt, col_uuid, Database};
use crate::error::{Result, StoreError};
use crate::items::get_item;
use crate::models::Proposal;

pub(crate) const PROPOSAL_COLS: &str = "id, proposer_id, target_owner_id, target_item_id, \
     offered_item_id, status, created_at, resolved_at";

impl Database {
    /// Record a new pending proposal after validating ownership.
    ///
    /// The partial unique index on (proposer, target item, offered item)
    /// rejects a second pending copy of the same offer; the violation is
    /// surfaced as [`StoreError::DuplicatePending`].
    pub fn submit_proposal(
        &mut self,
        proposer_id: Uuid,
        target_item_id: Uuid,
        offered_item_id: Uuid,
    ) -> Result<Proposal> {
        if target_item_id == offered_item_id {
            return Err(StoreError::InvalidProposal);
        }

        let tx = self.write_tx()?;

        let offered = get_item(&tx, offered_item_id)?;
        if offered.owner_id != proposer_id {
            return Err(StoreError::NotOwner);
        }

        let target = get_item(&tx, target_item_id)?;
        if target.owner_id == proposer_id {
            return Err(StoreError::SelfTarget);
        }

        if !offered.is_available || !target.is_available {
            return Err(StoreError::ItemUnavailable);
        }

        let proposal = Proposal {
            id: Uuid::new_v4(),
            proposer_id,
            target_owner_id: target.owner_id,
            target_item_id,
            offered_item_id,
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };

        let inserted = tx.execute(
            "INSERT INTO proposals (id, proposer_id, target_owner_id, target_item_id,
                                    offered_item_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            params![
                proposal.id.to_string(),
                proposal.proposer_id.to_string(),
                proposal.target_owner_id.to_string(),
                proposal.target_item_id.to_string(),
                proposal.offered_item_id.to_string(),
                proposal.created_at.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) => {
                let wrapped = StoreError::Sqlite(e);
                if wrapped.is_unique_violation() {
                    return Err(StoreError::DuplicatePending);
                }
                return Err(wrapped);
            }
        }

        tx.commit()?;

        tracing::debug!(
            proposal = %proposal.id,
            proposer = %proposer_id,
            "proposal recorded"
        );

        Ok(proposal)
    }

    /// Fetch a single proposal by id.
    pub fn get_proposal(&self, id: Uuid) -> Result<Proposal> {
        self.conn()
            .query_row(
                &format!("SELECT {PROPOSAL_COLS} FROM proposals WHERE id = ?1"),
                params![id.to_string()],
                row_to_proposal,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Sweep pending proposals older than `older_than_days` to `expired`.
    /// Returns the number of proposals expired.  Intended to be called
    /// periodically by the server.
    pub fn expire_stale_proposals(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let affected = self.conn().execute(
            "UPDATE proposals
             SET status = 'expired', resolved_at = ?1
             WHERE status = 'pending' AND created_at < ?2",
            params![Utc::now().to_rfc3339(), cutoff.to_rfc3339()],
        )?;
        if affected > 0 {
            tracing::info!(expired = affected, "swept stale proposals");
        }
        Ok(affected)
    }
}

/// Find the exact reciprocal of `proposal`: same two items, opposite
/// direction, still pending.  Partial overlaps never count.
pub(crate) fn find_reciprocal(conn: &Connection, proposal: &Proposal) -> Result<Option<Proposal>> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {PROPOSAL_COLS} FROM proposals
                 WHERE proposer_id = ?1
                   AND target_item_id = ?2
                   AND offered_item_id = ?3
                   AND status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT 1"
            ),
            params![
                proposal.target_owner_id.to_string(),
                proposal.offered_item_id.to_string(),
                proposal.target_item_id.to_string(),
            ],
            row_to_proposal,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::Sqlite(other)),
        })?;
    Ok(found)
}

/// Mark both halves of a resolved pair as matched.
pub(crate) fn mark_matched(conn: &Connection, ids: [Uuid; 2]) -> Result<()> {
    conn.execute(
        "UPDATE proposals SET status = 'matched', resolved_at = ?1
         WHERE id IN (?2, ?3) AND status = 'pending'",
        params![
            Utc::now().to_rfc3339(),
            ids[0].to_string(),
            ids[1].to_string(),
        ],
    )?;
    Ok(())
}

/// Cancel every pending proposal that offers or targets `item_id`.
/// Returns the number of proposals cancelled.
pub(crate) fn cancel_pending_referencing_item(conn: &Connection, item_id: Uuid) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE proposals SET status = 'cancelled', resolved_at = ?1
         WHERE status = 'pending' AND (target_item_id = ?2 OR offered_item_id = ?2)",
        params![Utc::now().to_rfc3339(), item_id.to_string()],
    )?;
    Ok(affected)
}

pub(crate) fn row_to_proposal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Proposal> {
    Ok(Proposal {
        id: col_uuid(row, 0)?,
        proposer_id: col_uuid(row, 1)?,
        target_owner_id: col_uuid(row, 2)?,
        target_item_id: col_uuid(row, 3)?,
        offered_item_id: col_uuid(row, 4)?,
        status: col_enum(row, 5, ProposalStatus::parse)?,
        created_at: col_ts(row, 6)?,
        resolved_at: col_ts_opt(row, 7)?,
    })
}
