use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::{CoordinationError, Result};

/// How long a writer waits on another process's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the coordination database at `path` and initialise the
/// schema. Every node of a cluster points at the same file.
pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_db(&conn)?;
    Ok(conn)
}

/// Initialise the coordination schema in `conn`. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS coordination_nodes (
            path        TEXT    NOT NULL PRIMARY KEY,
            data        BLOB    NOT NULL,
            version     INTEGER NOT NULL DEFAULT 0,   -- bumped on every write
            updated_at  TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS election_leases (
            group_key      TEXT    NOT NULL PRIMARY KEY,
            holder         TEXT    NOT NULL,
            expires_at_ms  INTEGER NOT NULL           -- epoch millis
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Run `f` against the shared connection on the blocking pool so a busy
/// database never stalls a runtime worker.
pub(crate) async fn with_conn<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock().expect("coordination connection poisoned");
        f(&guard)
    })
    .await
    .map_err(|e| CoordinationError::Unavailable(format!("blocking task failed: {e}")))?
}
