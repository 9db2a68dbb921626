//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps every entry in a [`BTreeMap`] behind a
//! [`parking_lot::RwLock`], so prefix scans come back in key order and
//! transactions commit under a single write lock.
//!
//! # Example
//!
//! ```
//! use fleetauth_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Performance Characteristics
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | get | O(log n) |
//! | set | O(log n) |
//! | delete | O(log n) |
//! | get_prefix | O(log n + k) where k is result size |
//!
//! Data is not persisted; all data is lost when the process exits.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

/// In-memory storage backend using [`BTreeMap`].
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
}

impl MemoryBackend {
    /// Creates a new, empty in-memory storage backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

fn scan_prefix(data: &BTreeMap<Vec<u8>, Bytes>, prefix: &[u8]) -> Vec<KeyValue> {
    data.range(prefix.to_vec()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
        .collect()
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let data = self.data.read();
        Ok(data.get(key).cloned())
    }

    #[tracing::instrument(skip(self, key, value), fields(key_len = key.len(), value_len = value.len()))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let mut data = self.data.write();
        data.insert(key, Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(skip(self, key, expected, new_value), fields(key_len = key.len()))]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        let mut data = self.data.write();

        let matches = match (expected, data.get(key)) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == &cur[..],
            _ => false,
        };

        if !matches {
            return Err(StorageError::Conflict);
        }

        data.insert(key.to_vec(), Bytes::from(new_value));
        Ok(())
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        Ok(u64::from(data.remove(key).is_some()))
    }

    #[tracing::instrument(skip(self, prefix), fields(prefix = %String::from_utf8_lossy(prefix)))]
    async fn get_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        let data = self.data.read();
        Ok(scan_prefix(&data, prefix))
    }

    #[tracing::instrument(skip(self))]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }
}

/// A conditional operation to be verified at commit time.
#[derive(Debug, Clone)]
enum Precondition {
    Set { key: Vec<u8>, expected: Option<Vec<u8>>, new_value: Vec<u8> },
    Delete { key: Vec<u8>, expected: Vec<u8> },
}

impl Precondition {
    fn holds(&self, data: &BTreeMap<Vec<u8>, Bytes>) -> bool {
        match self {
            Self::Set { key, expected, .. } => match (expected, data.get(key)) {
                (None, None) => true,
                (Some(expected), Some(current)) => expected.as_slice() == &current[..],
                _ => false,
            },
            Self::Delete { key, expected } => {
                data.get(key).is_some_and(|current| expected.as_slice() == &current[..])
            },
        }
    }
}

/// In-memory transaction implementation.
///
/// Buffers writes and deletes until commit, providing read-your-writes
/// semantics within the transaction.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    preconditions: Vec<Precondition>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_writes: BTreeMap::new(), preconditions: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.pending_writes.get(key) {
            return Ok(value.as_ref().map(|v| Bytes::copy_from_slice(v)));
        }

        self.backend.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending_writes.insert(key, None);
    }

    fn compare_and_set(&mut self, key: Vec<u8>, expected: Option<Vec<u8>>, new_value: Vec<u8>) {
        self.preconditions.push(Precondition::Set { key, expected, new_value });
    }

    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>) {
        self.preconditions.push(Precondition::Delete { key, expected });
    }

    #[tracing::instrument(
        name = "commit",
        skip(self),
        fields(writes = self.pending_writes.len(), preconditions = self.preconditions.len())
    )]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        fail_point!("memory-before-commit", |_| {
            Err(StorageError::internal("injected failure before transaction commit"))
        });

        let mut data = self.backend.data.write();

        if self.preconditions.iter().any(|p| !p.holds(&data)) {
            tracing::debug!("transaction precondition failed");
            return Err(StorageError::Conflict);
        }

        for precondition in self.preconditions {
            match precondition {
                Precondition::Set { key, new_value, .. } => {
                    data.insert(key, Bytes::from(new_value));
                },
                Precondition::Delete { key, .. } => {
                    data.remove(&key);
                },
            }
        }

        for (key, value) in self.pending_writes {
            match value {
                Some(v) => {
                    data.insert(key, Bytes::from(v));
                },
                None => {
                    data.remove(&key);
                },
            }
        }

        Ok(())
    }
}
