//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: daily aggregate cache
    r#"
    -- Each metric family owns a column group that is either all NULL
    -- (never computed) or all set. Segment '' is the unsegmented scope.
    CREATE TABLE IF NOT EXISTS daily_aggregates (
        site_id          INTEGER NOT NULL,
        segment          TEXT NOT NULL DEFAULT '',
        day              TEXT NOT NULL,

        -- repeat
        repeat_count     INTEGER,
        repeat_total     INTEGER,

        -- bounce
        bounce_count     INTEGER,
        bounce_total     INTEGER,

        -- pace
        sum_pace_time    REAL,
        sum_visits       INTEGER,

        -- distribution
        dist_0_5         INTEGER,
        dist_5_10        INTEGER,
        dist_10_30       INTEGER,
        dist_30_60       INTEGER,
        dist_60_plus     INTEGER,

        computed_at      DATETIME NOT NULL,

        PRIMARY KEY (site_id, segment, day)
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
