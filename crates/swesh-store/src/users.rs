//! CRUD operations for [`User`] records.

use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::{col_ts, col_uuid, Database};
use crate::error::{Result, StoreError};
use crate::models::User;

const USER_COLS: &str = "id, nickname, avatar, completed_exchanges_count, created_at";

impl Database {
    /// Insert a new user profile.
    pub fn create_user(&self, nickname: &str, avatar: Option<&str>) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            nickname: nickname.to_string(),
            avatar: avatar.map(str::to_string),
            completed_exchanges_count: 0,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO users (id, nickname, avatar, completed_exchanges_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.nickname,
                user.avatar,
                user.completed_exchanges_count,
                user.created_at.to_rfc3339(),
            ],
        )?;

        Ok(user)
    }

    /// Fetch a single user by id.
    pub fn get_user(&self, id: Uuid) -> Result<User> {
        get_user(self.conn(), id)
    }
}

pub(crate) fn get_user(conn: &Connection, id: Uuid) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
        params![id.to_string()],
        row_to_user,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::UserNotFound,
        other => StoreError::Sqlite(other),
    })
}

/// Bump a user's completed-exchange counter.  Only the completion cascade
/// calls this.
pub(crate) fn increment_completed_exchanges(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE users SET completed_exchanges_count = completed_exchanges_count + 1
         WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(())
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: col_uuid(row, 0)?,
        nickname: row.get(1)?,
        avatar: row.get(2)?,
        completed_exchanges_count: row.get(3)?,
        created_at: col_ts(row, 4)?,
    })
}
