//! Operations on listed [`Item`]s.
//!
//! Deleting an item is not plain CRUD: every active match referencing the
//! item is archived (reason `item_deleted`) and every pending proposal
//! naming it is cancelled, in the same transaction that removes the row.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use swesh_core::{ArchivalReason, ItemCategory, ItemCondition, ItemSize};

use crate::database::{col_enum, col_json, col_ts, col_ts_opt, col_uuid, col_uuid_opt, Database};
use crate::error::{Result, StoreError};
use crate::exchange::{archive_match, ArchivedMatchNote};
use crate::matches::active_matches_referencing;
use crate::models::{Item, NewItem};
use crate::proposals::cancel_pending_referencing_item;

pub(crate) const ITEM_COLS: &str = "id, owner_id, title, description, images, size, category, \
     condition, is_available, exchanged_at, exchanged_in_match_id, exchanged_with, created_at";

/// What an item deletion did, so the caller can notify affected users.
#[derive(Debug, Clone, Serialize)]
pub struct ItemDeletionReport {
    pub item_id: Uuid,
    pub item_title: String,
    pub archived: Vec<ArchivedMatchNote>,
    pub cancelled_proposals: usize,
}

impl Database {
    /// Insert a new item owned by `owner_id`.
    pub fn create_item(&self, owner_id: Uuid, new: NewItem) -> Result<Item> {
        let item = Item {
            id: Uuid::new_v4(),
            owner_id,
            title: new.title,
            description: new.description,
            images: new.images,
            size: new.size,
            category: new.category,
            condition: new.condition,
            is_available: true,
            exchanged_at: None,
            exchanged_in_match_id: None,
            exchanged_with: None,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO items (id, owner_id, title, description, images, size, category,
                                condition, is_available, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
            params![
                item.id.to_string(),
                item.owner_id.to_string(),
                item.title,
                item.description,
                serde_json::to_string(&item.images)?,
                item.size.as_str(),
                item.category.as_str(),
                item.condition.as_str(),
                item.created_at.to_rfc3339(),
            ],
        )?;

        Ok(item)
    }

    /// Fetch a single item by id.
    pub fn get_item(&self, id: Uuid) -> Result<Item> {
        get_item(self.conn(), id)
    }

    /// Discovery feed for `user_id`: available items listed by others that
    /// the user has not yet reacted to, newest first.
    pub fn list_feed(&self, user_id: Uuid) -> Result<Vec<Item>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ITEM_COLS} FROM items
             WHERE is_available = 1
               AND owner_id != ?1
               AND NOT EXISTS (
                   SELECT 1 FROM interactions
                   WHERE interactions.user_id = ?1 AND interactions.item_id = items.id
               )
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_item)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// All items listed by `owner_id`, newest first.
    pub fn list_user_items(&self, owner_id: Uuid) -> Result<Vec<Item>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ITEM_COLS} FROM items WHERE owner_id = ?1 ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![owner_id.to_string()], row_to_item)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Delete an item and cascade: archive its active matches (reason
    /// `item_deleted`) and cancel pending proposals that name it.
    pub fn delete_item(&mut self, item_id: Uuid, acting_user: Uuid) -> Result<ItemDeletionReport> {
        let tx = self.write_tx()?;

        let item = get_item(&tx, item_id)?;
        if item.owner_id != acting_user {
            return Err(StoreError::NotOwner);
        }

        let mut archived = Vec::new();
        for m in active_matches_referencing(&tx, &[item_id])? {
            archived.push(archive_match(
                &tx,
                &m,
                ArchivalReason::ItemDeleted,
                None,
                &item.title,
            )?);
        }

        let cancelled_proposals = cancel_pending_referencing_item(&tx, item_id)?;

        tx.execute(
            "DELETE FROM items WHERE id = ?1",
            params![item_id.to_string()],
        )?;

        tx.commit()?;

        tracing::info!(
            item = %item_id,
            archived = archived.len(),
            cancelled = cancelled_proposals,
            "item deleted"
        );

        Ok(ItemDeletionReport {
            item_id,
            item_title: item.title,
            archived,
            cancelled_proposals,
        })
    }
}

pub(crate) fn get_item(conn: &Connection, id: Uuid) -> Result<Item> {
    conn.query_row(
        &format!("SELECT {ITEM_COLS} FROM items WHERE id = ?1"),
        params![id.to_string()],
        row_to_item,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::ItemNotFound,
        other => StoreError::Sqlite(other),
    })
}

/// Retire a traded item.  Only the completion cascade calls this.
pub(crate) fn mark_exchanged(
    conn: &Connection,
    item_id: Uuid,
    match_id: Uuid,
    exchanged_with: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE items
         SET is_available = 0, exchanged_at = ?2, exchanged_in_match_id = ?3, exchanged_with = ?4
         WHERE id = ?1",
        params![
            item_id.to_string(),
            at.to_rfc3339(),
            match_id.to_string(),
            exchanged_with.to_string(),
        ],
    )?;
    Ok(())
}

pub(crate) fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: col_uuid(row, 0)?,
        owner_id: col_uuid(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        images: col_json(row, 4)?,
        size: col_enum(row, 5, ItemSize::parse)?,
        category: col_enum(row, 6, ItemCategory::parse)?,
        condition: col_enum(row, 7, ItemCondition::parse)?,
        is_available: row.get(8)?,
        exchanged_at: col_ts_opt(row, 9)?,
        exchanged_in_match_id: col_uuid_opt(row, 10)?,
        exchanged_with: col_uuid_opt(row, 11)?,
        created_at: col_ts(row, 12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{item, user};
    use swesh_core::InteractionAction;

    #[test]
    fn feed_excludes_own_and_seen_items() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open_at(&dir.path().join("t.db")).unwrap();

        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let own = item(&db, alice, "Own jacket");
        let fresh = item(&db, bob, "Fresh boots");
        let seen = item(&db, bob, "Seen scarf");

        db.record_interaction(alice, seen, InteractionAction::Skip)
            .unwrap();

        let feed = db.list_feed(alice).unwrap();
        let ids: Vec<Uuid> = feed.iter().map(|i| i.id).collect();
        assert!(ids.contains(&fresh));
        assert!(!ids.contains(&own));
        assert!(!ids.contains(&seen));
    }

    #[test]
    fn delete_requires_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open_at(&dir.path().join("t.db")).unwrap();

        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let jacket = item(&db, alice, "Jacket");

        assert!(matches!(
            db.delete_item(jacket, bob),
            Err(StoreError::NotOwner)
        ));
        db.delete_item(jacket, alice).unwrap();
        assert!(matches!(db.get_item(jacket), Err(StoreError::ItemNotFound)));
    }
}
