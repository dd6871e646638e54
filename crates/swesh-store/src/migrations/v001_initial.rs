//! v001 -- Initial schema creation.
//!
//! Creates the seven core tables: `users`, `items`, `interactions`,
//! `proposals`, `matches`, `chats`, `messages`, plus the per-day
//! `rate_counters` table.  The uniqueness guarantees the lifecycle relies
//! on live here: one pending proposal per triple, one match per 4-tuple,
//! one chat per match, one interaction per (user, item), one counter per
//! (user, day).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id                        TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    nickname                  TEXT NOT NULL,
    avatar                    TEXT,                       -- catalog avatar id
    completed_exchanges_count INTEGER NOT NULL DEFAULT 0,
    created_at                TEXT NOT NULL               -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Items
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS items (
    id                    TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    owner_id              TEXT NOT NULL,                  -- FK -> users(id)
    title                 TEXT NOT NULL,
    description           TEXT NOT NULL DEFAULT '',
    images                TEXT NOT NULL DEFAULT '[]',     -- JSON array of refs
    size                  TEXT NOT NULL,
    category              TEXT NOT NULL,
    condition             TEXT NOT NULL,
    is_available          INTEGER NOT NULL DEFAULT 1,     -- boolean 0/1
    exchanged_at          TEXT,
    exchanged_in_match_id TEXT,
    exchanged_with        TEXT,
    created_at            TEXT NOT NULL,

    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_items_owner ON items(owner_id);
CREATE INDEX IF NOT EXISTS idx_items_available ON items(is_available);

-- ----------------------------------------------------------------
-- Interactions (like / dislike / skip)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS interactions (
    user_id    TEXT NOT NULL,                             -- FK -> users(id)
    item_id    TEXT NOT NULL,                             -- FK -> items(id)
    action     TEXT NOT NULL,                             -- like/dislike/skip
    updated_at TEXT NOT NULL,

    PRIMARY KEY (user_id, item_id),
    FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_interactions_user_action
    ON interactions(user_id, action);

-- ----------------------------------------------------------------
-- Proposals
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS proposals (
    id              TEXT PRIMARY KEY NOT NULL,            -- UUID v4
    proposer_id     TEXT NOT NULL,
    target_owner_id TEXT NOT NULL,
    target_item_id  TEXT NOT NULL,
    offered_item_id TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending',
    created_at      TEXT NOT NULL,
    resolved_at     TEXT
);

-- At most one *pending* proposal per exact triple.
CREATE UNIQUE INDEX IF NOT EXISTS idx_proposals_pending_triple
    ON proposals(proposer_id, target_item_id, offered_item_id)
    WHERE status = 'pending';

-- Reciprocal lookup path.
CREATE INDEX IF NOT EXISTS idx_proposals_reciprocal
    ON proposals(proposer_id, target_item_id, offered_item_id, status);

-- ----------------------------------------------------------------
-- Matches
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS matches (
    id                        TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    user_a                    TEXT NOT NULL,              -- canonical: user_a < user_b
    user_b                    TEXT NOT NULL,
    item_a                    TEXT NOT NULL,              -- pre-match property of user_a
    item_b                    TEXT NOT NULL,
    status                    TEXT NOT NULL DEFAULT 'active',
    match_type                TEXT NOT NULL,              -- tinder/proposal
    chat_id                   TEXT,
    last_activity_at          TEXT NOT NULL,
    user_a_confirmed          INTEGER NOT NULL DEFAULT 0,
    user_a_confirmed_at       TEXT,
    user_b_confirmed          INTEGER NOT NULL DEFAULT 0,
    user_b_confirmed_at       TEXT,
    completed_at              TEXT,
    cancelled_by              TEXT,
    cancelled_at              TEXT,
    cancel_reason             TEXT,
    archival_reason           TEXT,
    archival_related_match_id TEXT,
    archived_at               TEXT,
    created_at                TEXT NOT NULL,

    UNIQUE (user_a, user_b, item_a, item_b)
);

CREATE INDEX IF NOT EXISTS idx_matches_user_a ON matches(user_a);
CREATE INDEX IF NOT EXISTS idx_matches_user_b ON matches(user_b);
CREATE INDEX IF NOT EXISTS idx_matches_item_a ON matches(item_a);
CREATE INDEX IF NOT EXISTS idx_matches_item_b ON matches(item_b);

-- ----------------------------------------------------------------
-- Chats (exactly one per match)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id              TEXT PRIMARY KEY NOT NULL,            -- UUID v4
    match_id        TEXT NOT NULL UNIQUE,                 -- FK -> matches(id)
    user_a          TEXT NOT NULL,
    user_b          TEXT NOT NULL,
    last_message_at TEXT,
    unread_counts   TEXT NOT NULL DEFAULT '{}',           -- JSON {user_id: n}

    FOREIGN KEY (match_id) REFERENCES matches(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,                 -- UUID v4
    chat_id    TEXT NOT NULL,                             -- FK -> chats(id)
    sender_id  TEXT,                                      -- NULL for system messages
    content    TEXT NOT NULL,
    read_by    TEXT NOT NULL DEFAULT '[]',                -- JSON array of user ids
    is_system  INTEGER NOT NULL DEFAULT 0,                -- boolean 0/1
    created_at TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, created_at DESC);

-- ----------------------------------------------------------------
-- Per-day proposal counters
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rate_counters (
    user_id         TEXT NOT NULL,
    date_key        TEXT NOT NULL,                        -- UTC day, YYYY-MM-DD
    proposals_count INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (user_id, date_key)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
