//! Transaction trait for atomic storage operations.
//!
//! # Transaction Semantics
//!
//! - **Atomicity**: All operations in a transaction either succeed together or fail together
//! - **Read-your-writes**: Reads within a transaction see pending writes
//! - **Buffering**: Writes are buffered until commit
//! - **Preconditions**: compare-and-set and compare-and-delete are checked at commit time
//!
//! # Example
//!
//! ```
//! use fleetauth_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.set(b"services/a".to_vec(), b"key-a".to_vec()).await.unwrap();
//! backend.set(b"tokens/a/1".to_vec(), b"token".to_vec()).await.unwrap();
//!
//! // Remove the service only if nobody replaced it, together with its rows.
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_delete(b"services/a".to_vec(), b"key-a".to_vec());
//! txn.delete(b"tokens/a/1".to_vec());
//! txn.commit().await.unwrap();
//!
//! assert!(backend.get(b"services/a").await.unwrap().is_none());
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// A transaction buffers operations until [`commit`](Transaction::commit) is
/// called, at which point all preconditions are checked and all operations
/// are applied atomically.
#[async_trait]
pub trait Transaction: Send {
    /// Gets a value within the transaction.
    ///
    /// Pending writes and deletes made in this transaction take precedence
    /// over the underlying storage.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers a set operation.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a delete operation.
    ///
    /// Deleting an absent key is not an error.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a conditional set.
    ///
    /// `expected: None` requires the key to be absent at commit time.
    fn compare_and_set(&mut self, key: Vec<u8>, expected: Option<Vec<u8>>, new_value: Vec<u8>);

    /// Buffers a conditional delete.
    ///
    /// The key must hold exactly `expected` at commit time, so a row that
    /// vanished or changed since it was read rejects the whole transaction.
    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>);

    /// Commits all buffered operations atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if any buffered precondition
    ///   does not hold; nothing is applied
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
