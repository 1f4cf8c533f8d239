use std::path::Path;
use std::time::Duration;

use panel_library_common::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use tracing::info;

/// Open a database file with the pragmas every store expects.
///
/// The busy timeout also bounds how long startup waits on another process
/// that holds the migration lock.
pub fn open_connection(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    info!("opening database at {}", db_path.display());
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
    Ok(conn)
}

/// Open an existing database without creating it or changing its pragmas.
pub fn open_read_only(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::Database(format!("failed to open database read-only: {e}")))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))
}
