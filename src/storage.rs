// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use rustc_hash::FxHashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering::Release},
    Arc, Mutex,
};

/// Blob storage the compaction reads inputs from and writes outputs to
///
/// Implementations are injected by the embedder; the crate only ships
/// [`MemoryObjectStore`].
pub trait ObjectStore: Send + Sync {
    /// Downloads the given blobs, preserving order.
    ///
    /// # Errors
    ///
    /// Fails if any path is missing or the backend is unavailable.
    fn download(&self, paths: &[String]) -> crate::Result<Vec<Vec<u8>>>;

    /// Uploads one blob.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the write.
    fn upload(&self, path: &str, data: Vec<u8>) -> crate::Result<()>;
}

/// Issues globally unique 64-bit IDs for output segments and binlogs
pub trait IdAllocator: Send + Sync {
    /// Allocates one fresh ID.
    ///
    /// # Errors
    ///
    /// Fails if the allocator backend is exhausted or unreachable.
    fn alloc_one(&self) -> crate::Result<u64>;
}

/// In-memory [`ObjectStore`] used in tests and for embedding
#[derive(Default)]
pub struct MemoryObjectStore {
    blobs: Mutex<FxHashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.blobs.lock().expect("lock is poisoned").len()
    }

    /// Returns a copy of one blob, if present.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().expect("lock is poisoned").get(path).cloned()
    }

    /// Lists all stored blob paths.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.blobs
            .lock()
            .expect("lock is poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl ObjectStore for MemoryObjectStore {
    #[allow(clippy::expect_used)]
    fn download(&self, paths: &[String]) -> crate::Result<Vec<Vec<u8>>> {
        let blobs = self.blobs.lock().expect("lock is poisoned");

        paths
            .iter()
            .map(|path| {
                blobs.get(path).cloned().ok_or_else(|| {
                    crate::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no blob at {path}"),
                    ))
                })
            })
            .collect()
    }

    #[allow(clippy::expect_used)]
    fn upload(&self, path: &str, data: Vec<u8>) -> crate::Result<()> {
        self.blobs
            .lock()
            .expect("lock is poisoned")
            .insert(path.into(), data);

        Ok(())
    }
}

/// Thread-safe monotonic ID allocator
///
/// # Examples
///
/// ```
/// use clustering_compaction::{IdAllocator, SequenceIdAllocator};
///
/// let allocator = SequenceIdAllocator::new(1_000);
///
/// assert_eq!(1_000, allocator.alloc_one()?);
/// assert_eq!(1_001, allocator.alloc_one()?);
/// # Ok::<(), clustering_compaction::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct SequenceIdAllocator(Arc<AtomicU64>);

impl SequenceIdAllocator {
    /// Creates a new allocator, starting at some previous value.
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }
}

impl IdAllocator for SequenceIdAllocator {
    fn alloc_one(&self) -> crate::Result<u64> {
        let id = self.0.fetch_add(1, Release);

        if id == u64::MAX {
            return Err(crate::Error::Alloc("ran out of IDs".into()));
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn memory_store_roundtrip() -> crate::Result<()> {
        let store = MemoryObjectStore::new();
        store.upload("a/b", vec![1, 2, 3])?;

        let blobs = store.download(&["a/b".into()])?;
        assert_eq!(vec![vec![1, 2, 3]], blobs);

        Ok(())
    }

    #[test]
    fn memory_store_missing_blob() {
        let store = MemoryObjectStore::new();

        assert!(matches!(
            store.download(&["nope".into()]),
            Err(crate::Error::Io(_))
        ));
    }

    #[test]
    fn allocator_is_monotonic() -> crate::Result<()> {
        let allocator = SequenceIdAllocator::new(5);

        assert_eq!(5, allocator.alloc_one()?);
        assert_eq!(6, allocator.alloc_one()?);

        Ok(())
    }
}
