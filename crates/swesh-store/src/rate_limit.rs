//! Per-user, per-UTC-day proposal admission.
//!
//! A single conditional upsert both creates the day's counter and
//! increments it, so concurrent submissions from the same user can never
//! overshoot the ceiling.  The counter resets implicitly when the UTC date
//! key rolls over.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Admit one proposal attempt for `user_id` today, or fail with
    /// [`StoreError::RateLimitExceeded`] once `limit` attempts have been
    /// admitted.  Returns the new count on success.
    ///
    /// Must be called before the ledger insertion of every proposal.
    pub fn admit_proposal(&self, user_id: Uuid, limit: u32) -> Result<u32> {
        let date_key = Utc::now().format("%Y-%m-%d").to_string();
        self.admit_proposal_on(user_id, &date_key, limit)
    }

    /// [`Database::admit_proposal`] with an explicit date key, so the
    /// rollover behavior is testable without waiting for midnight.
    pub fn admit_proposal_on(&self, user_id: Uuid, date_key: &str, limit: u32) -> Result<u32> {
        // The WHERE clause on the conflict arm makes the increment refuse
        // to pass the ceiling; no row comes back when it refuses.
        let count: Option<u32> = self
            .conn()
            .query_row(
                "INSERT INTO rate_counters (user_id, date_key, proposals_count)
                 VALUES (?1, ?2, 1)
                 ON CONFLICT (user_id, date_key) DO UPDATE
                     SET proposals_count = proposals_count + 1
                     WHERE proposals_count < ?3
                 RETURNING proposals_count",
                params![user_id.to_string(), date_key, limit],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;

        match count {
            Some(n) => Ok(n),
            None => {
                tracing::warn!(user = %user_id, limit, "daily proposal limit reached");
                Err(StoreError::RateLimitExceeded { limit })
            }
        }
    }
}
