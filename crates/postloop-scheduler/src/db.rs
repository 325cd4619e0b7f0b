use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::{Result, SchedulerError};

/// Initialise the scheduling schema in `conn`. Idempotent.
///
/// Timestamps are fixed-width RFC 3339 UTC strings with millisecond
/// precision, so `ORDER BY` and range comparisons on the text columns follow
/// chronological order.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT NOT NULL PRIMARY KEY,
            user_id     TEXT NOT NULL,
            caption     TEXT,
            assets      TEXT NOT NULL DEFAULT '[]',  -- JSON array of MediaAsset
            texts       TEXT NOT NULL DEFAULT '{}',  -- JSON object provider -> text
            created_at  TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_posts_user ON posts (user_id, created_at);

        CREATE TABLE IF NOT EXISTS schedules (
            id             TEXT    NOT NULL PRIMARY KEY,
            user_id        TEXT    NOT NULL,
            name           TEXT    NOT NULL,
            strategy       TEXT    NOT NULL,
            scope          TEXT    NOT NULL,
            rule           TEXT    NOT NULL,
            timezone       TEXT    NOT NULL DEFAULT 'UTC',
            next_run       TEXT,               -- NULL means idle
            is_active      INTEGER NOT NULL DEFAULT 1,
            auto_reset     INTEGER NOT NULL DEFAULT 0,
            reset_count    INTEGER NOT NULL DEFAULT 0,
            last_reset_at  TEXT,
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        ) STRICT;

        -- Polling: WHERE is_active = 1 AND next_run <= ?
        CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules (is_active, next_run);

        CREATE TABLE IF NOT EXISTS schedule_items (
            schedule_id  TEXT NOT NULL REFERENCES schedules (id) ON DELETE CASCADE,
            post_id      TEXT NOT NULL REFERENCES posts (id) ON DELETE CASCADE,
            PRIMARY KEY (schedule_id, post_id)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS dispatch_entries (
            id             TEXT    NOT NULL PRIMARY KEY,
            schedule_id    TEXT    REFERENCES schedules (id) ON DELETE CASCADE,
            post_id        TEXT    NOT NULL REFERENCES posts (id) ON DELETE CASCADE,
            user_id        TEXT    NOT NULL,
            scheduled_at   TEXT    NOT NULL,
            status         TEXT    NOT NULL DEFAULT 'pending',
            posted_at      TEXT,
            error_message  TEXT,
            attempts       INTEGER NOT NULL DEFAULT 0,
            failed_at      TEXT,
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_entries_status_due
            ON dispatch_entries (status, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_entries_schedule
            ON dispatch_entries (schedule_id, status);

        -- One entry per schedule occurrence; ad hoc entries are exempt.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_occurrence
            ON dispatch_entries (schedule_id, scheduled_at)
            WHERE schedule_id IS NOT NULL;
        ",
    )?;
    Ok(())
}

/// Render a timestamp in the stored column format.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp column.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

pub fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}
