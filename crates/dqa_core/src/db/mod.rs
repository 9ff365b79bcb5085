//! SQLite access for the conversation store.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::AppError;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    name: "0001_conversation_turns.sql",
    sql: include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0001_conversation_turns.sql"
    )),
}];

fn db_error(code: &str, message: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> AppError {
    let err = AppError::new(code, message);
    move |e| err.with_details(e.to_string())
}

/// Open (creating parent directories) with a busy timeout so a second `docqa`
/// process waits on the write lock instead of failing.
pub fn open(path: &Path) -> Result<Connection, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::new("DB_OPEN_FAILED", "Failed to create database directory")
                .with_details(format!("path={}; err={}", parent.display(), e))
        })?;
    }
    let conn = Connection::open(path).map_err(|e| {
        AppError::new("DB_OPEN_FAILED", "Failed to open SQLite database")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(db_error("DB_OPEN_FAILED", "Failed to set busy timeout"))?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, AppError> {
    Connection::open_in_memory().map_err(db_error(
        "DB_OPEN_FAILED",
        "Failed to open in-memory SQLite database",
    ))
}

fn applied_migrations(conn: &Connection) -> Result<HashSet<String>, AppError> {
    let mut stmt = conn
        .prepare("SELECT name FROM _migrations")
        .map_err(db_error("DB_MIGRATIONS_QUERY_FAILED", "Failed to query applied migrations"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(db_error("DB_MIGRATIONS_QUERY_FAILED", "Failed to read applied migrations"))?
        .collect::<Result<HashSet<_>, _>>()
        .map_err(db_error("DB_MIGRATIONS_QUERY_FAILED", "Failed to read applied migration row"))?;
    Ok(names)
}

/// Apply pending migrations in order, each in its own transaction, recorded by name.
pub fn migrate(conn: &mut Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
           name TEXT PRIMARY KEY NOT NULL,
           applied_at TEXT NOT NULL
         );",
    )
    .map_err(db_error(
        "DB_MIGRATIONS_TABLE_FAILED",
        "Failed to ensure migrations table exists",
    ))?;

    let applied = applied_migrations(conn)?;
    for m in MIGRATIONS.iter().filter(|m| !applied.contains(m.name)) {
        let tx = conn
            .transaction()
            .map_err(db_error("DB_TX_FAILED", "Failed to start migration transaction"))?;
        tx.execute_batch(m.sql)
            .map_err(db_error("DB_MIGRATION_FAILED", format!("Migration {} failed", m.name)))?;
        tx.execute(
            "INSERT INTO _migrations(name, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
            [m.name],
        )
        .map_err(db_error(
            "DB_MIGRATION_FAILED",
            format!("Failed to record migration {}", m.name),
        ))?;
        tx.commit()
            .map_err(db_error("DB_TX_FAILED", "Failed to commit migration transaction"))?;
        tracing::debug!(migration = m.name, "applied migration");
    }
    Ok(())
}
