use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CoordinationError, Result};

/// Durable, path-addressed byte store shared by every node of a cluster.
///
/// Writes replace the whole value at a path in one step; readers never see a
/// partially written value.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Whether a node exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create an empty node at `path`. No-op if it already exists.
    async fn create(&self, path: &str) -> Result<()>;

    /// Read the bytes stored at `path`.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Atomically replace the bytes stored at `path`.
    ///
    /// Fails with [`CoordinationError::NoNode`] if the path was never created.
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;
}

/// In-process store. Values live only as long as the process.
pub struct MemoryStore {
    nodes: Mutex<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordinationError::Unavailable(
                "memory store marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        self.check_available()?;
        let nodes = self.nodes.lock().expect("memory store poisoned");
        Ok(nodes.contains_key(path))
    }

    async fn create(&self, path: &str) -> Result<()> {
        self.check_available()?;
        let mut nodes = self.nodes.lock().expect("memory store poisoned");
        nodes.entry(path.to_string()).or_default();
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.check_available()?;
        let nodes = self.nodes.lock().expect("memory store poisoned");
        nodes
            .get(path)
            .cloned()
            .ok_or_else(|| CoordinationError::NoNode {
                path: path.to_string(),
            })
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.check_available()?;
        let mut nodes = self.nodes.lock().expect("memory store poisoned");
        match nodes.get_mut(path) {
            Some(slot) => {
                *slot = data.to_vec();
                Ok(())
            }
            None => Err(CoordinationError::NoNode {
                path: path.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_read_is_empty() {
        let store = MemoryStore::new();
        assert!(!store.exists("/job/a/status").await.unwrap());
        store.create("/job/a/status").await.unwrap();
        assert!(store.exists("/job/a/status").await.unwrap());
        assert!(store.read("/job/a/status").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_does_not_clobber_existing_value() {
        let store = MemoryStore::new();
        store.create("/p").await.unwrap();
        store.write("/p", b"abc").await.unwrap();
        store.create("/p").await.unwrap();
        assert_eq!(store.read("/p").await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn write_replaces_whole_value() {
        let store = MemoryStore::new();
        store.create("/p").await.unwrap();
        store.write("/p", b"longer value").await.unwrap();
        store.write("/p", b"short").await.unwrap();
        assert_eq!(store.read("/p").await.unwrap(), b"short");
    }

    #[tokio::test]
    async fn write_without_create_fails() {
        let store = MemoryStore::new();
        let err = store.write("/missing", b"x").await.unwrap_err();
        assert!(matches!(err, CoordinationError::NoNode { .. }));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.create("/p").await.unwrap();
        store.set_available(false);
        assert!(store.exists("/p").await.is_err());
        assert!(store.read("/p").await.is_err());
        assert!(store.write("/p", b"x").await.is_err());
        store.set_available(true);
        assert!(store.write("/p", b"x").await.is_ok());
    }
}
