use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::{
    db::{init_db, with_conn},
    error::{CoordinationError, Result},
    store::CoordinationStore,
};

/// [`CoordinationStore`] backed by the `coordination_nodes` SQLite table.
///
/// Every write is a single `UPDATE` of one row, so a value is always replaced
/// as a whole.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the shared database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        Self::new(crate::db::open(path)?)
    }
}

#[async_trait]
impl CoordinationStore for SqliteStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let path = path.to_string();
        with_conn(&self.conn, move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM coordination_nodes WHERE path = ?1",
                    [&path],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn create(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        with_conn(&self.conn, move |conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO coordination_nodes (path, data, version, updated_at)
                 VALUES (?1, X'', 0, ?2)",
                rusqlite::params![path, Utc::now().to_rfc3339()],
            )?;
            if n > 0 {
                debug!(%path, "coordination node created");
            }
            Ok(())
        })
        .await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = path.to_string();
        with_conn(&self.conn, move |conn| {
            conn.query_row(
                "SELECT data FROM coordination_nodes WHERE path = ?1",
                [&path],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?
            .ok_or(CoordinationError::NoNode { path })
        })
        .await
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = path.to_string();
        let data = data.to_vec();
        with_conn(&self.conn, move |conn| {
            let n = conn.execute(
                "UPDATE coordination_nodes
                 SET data = ?1, version = version + 1, updated_at = ?2
                 WHERE path = ?3",
                rusqlite::params![data, Utc::now().to_rfc3339(), path],
            )?;
            if n == 0 {
                return Err(CoordinationError::NoNode { path });
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn missing_path_does_not_exist() {
        let store = store();
        assert!(!store.exists("/job/x/status").await.unwrap());
        let err = store.read("/job/x/status").await.unwrap_err();
        assert!(matches!(err, CoordinationError::NoNode { .. }));
    }

    #[tokio::test]
    async fn create_write_read() {
        let store = store();
        store.create("/job/x/status").await.unwrap();
        assert!(store.exists("/job/x/status").await.unwrap());
        assert!(store.read("/job/x/status").await.unwrap().is_empty());

        store.write("/job/x/status", &[1, 2, 3]).await.unwrap();
        assert_eq!(store.read("/job/x/status").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = store();
        store.create("/p").await.unwrap();
        store.write("/p", b"keep").await.unwrap();
        store.create("/p").await.unwrap();
        assert_eq!(store.read("/p").await.unwrap(), b"keep");
    }

    #[tokio::test]
    async fn write_before_create_is_no_node() {
        let store = store();
        let err = store.write("/p", b"x").await.unwrap_err();
        assert!(matches!(err, CoordinationError::NoNode { .. }));
    }

    #[tokio::test]
    async fn write_bumps_version() {
        let store = store();
        store.create("/p").await.unwrap();
        store.write("/p", b"a").await.unwrap();
        store.write("/p", b"b").await.unwrap();
        let version: i64 = {
            let conn = store.conn.lock().unwrap();
            conn.query_row(
                "SELECT version FROM coordination_nodes WHERE path = '/p'",
                [],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert_eq!(version, 2);
    }
}
