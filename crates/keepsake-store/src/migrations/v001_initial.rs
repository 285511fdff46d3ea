//! v001 -- Initial schema creation.
//!
//! Creates the `capsules` table and the owner/creation-time index used by the
//! list query.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Capsules
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS capsules (
    id           TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    owner_uid    TEXT NOT NULL,                 -- identity-provider user id, immutable
    title        TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    open_at      TEXT NOT NULL,                 -- ISO-8601 / RFC-3339
    image_urls   TEXT NOT NULL DEFAULT '[]',    -- JSON array of durable URLs
    participants TEXT NOT NULL DEFAULT '[]',    -- JSON array of uids / emails
    is_opened    INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1, advisory
    notify_sent  INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1, advisory
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_capsules_owner_created
    ON capsules(owner_uid, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
