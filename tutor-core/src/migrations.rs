//! Versioned schema management for the tutor database
//!
//! Migrations are embedded at compile time and applied in order inside the open
//! call. Applied migrations are tracked in a `_migrations` table and the current
//! schema version is mirrored into `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::{debug, info};

/// Schema version written to `PRAGMA user_version` once all migrations are applied
pub const SCHEMA_VERSION: i64 = 1;

/// Embedded migration files, one per schema version
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "001_initial_schema.sql",
    include_str!("../migrations/001_initial_schema.sql"),
)];

/// Run all pending migrations on the database
///
/// Every statement is `CREATE ... IF NOT EXISTS`, so replaying a migration against a
/// schema that already has its tables is a no-op.
pub fn run_migrations(conn: &mut Connection) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let applied = get_applied_migrations(conn)?;
    let mut applied_count = 0;

    for (version, name, sql) in MIGRATIONS {
        if applied.iter().any(|a| a == name) {
            debug!("Migration already applied: {}", name);
            continue;
        }

        info!("Applying migration {} (schema version {})", name, version);

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;

        applied_count += 1;
    }

    if applied_count > 0 {
        info!("Applied {} new migration(s)", applied_count);
    } else {
        debug!("Database schema is up to date");
    }

    Ok(applied_count)
}

/// Read the schema version recorded in the database header
pub fn schema_version(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Get list of all applied migrations
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT name FROM _migrations ORDER BY id")?;
    stmt.query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()
}
