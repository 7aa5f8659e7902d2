use async_trait::async_trait;

use crate::error::KeyValueStoreError;
use crate::read::DeleteRequest;
use crate::read::DeleteResult;
use crate::read::ReadRequest;
use crate::read::ReadResult;
use crate::write::WriteRequest;
use crate::write::WriteResult;

/// Host document store.
///
/// Implementations must apply each [`WriteRequest`] atomically. In
/// particular a `CompareAndSwap` must compare and write under the same
/// critical section so that concurrent writers to one key are totally
/// ordered; the loser gets [`KeyValueStoreError::CompareAndSwapFailed`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write to the store.
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError>;

    /// Read a value by key with revision metadata.
    ///
    /// A missing key is `Ok` with `kv: None`, not `NotFound`.
    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError>;

    /// Delete a key from the store.
    ///
    /// Returns `is_deleted = false` if the key was not found (idempotent).
    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        (**self).write(request).await
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        (**self).read(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        (**self).delete(request).await
    }
}
