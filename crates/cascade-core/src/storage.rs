//! Object-store abstraction for persisted engine state.
//!
//! Store segments are immutable blobs in a shared, read-mostly object
//! store. Backends must provide a `rename` so writers can follow the
//! write-then-rename discipline: a segment is written under a scratch
//! path and only becomes visible under its final path once complete.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
}

/// Object storage contract shared by all backends.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes an object unconditionally.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Atomically renames an object.
    ///
    /// Returns `Error::NotFound` if the source doesn't exist.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Deletes an object. Idempotent: deleting a missing object succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects under a prefix, in lexicographic path order.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Writes an object under a scratch path, then renames it into place.
    async fn put_atomic(&self, path: &str, data: Bytes) -> Result<()> {
        let scratch = format!("{path}.write");
        self.put(&scratch, data).await?;
        self.rename(&scratch, path).await
    }
}

/// In-memory object store for tests and single-process runs.
///
/// Thread-safe via `RwLock`; `BTreeMap` keeps listings sorted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| Error::internal("lock poisoned"))?;
        objects
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| Error::internal("lock poisoned"))?;
        objects.insert(path.to_string(), data);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| Error::internal("lock poisoned"))?;
        let data = objects
            .remove(from)
            .ok_or_else(|| Error::NotFound(format!("object not found: {from}")))?;
        objects.insert(to.to_string(), data);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| Error::internal("lock poisoned"))?;
        objects.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::internal("lock poisoned"))?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, data)| ObjectMeta {
                path: path.clone(),
                size: data.len() as u64,
            })
            .collect())
    }
}
