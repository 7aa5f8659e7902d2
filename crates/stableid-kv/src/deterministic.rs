//! In-memory deterministic store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::constants::MAX_KEY_SIZE;
use crate::constants::MAX_VALUE_SIZE;
use crate::error::KeyValueStoreError;
use crate::read::DeleteRequest;
use crate::read::DeleteResult;
use crate::read::KeyValueWithRevision;
use crate::read::ReadRequest;
use crate::read::ReadResult;
use crate::traits::KeyValueStore;
use crate::write::WriteCommand;
use crate::write::WriteRequest;
use crate::write::WriteResult;

/// Versioned value for tracking revisions.
#[derive(Clone)]
struct VersionedValue {
    value: String,
    create_revision: u64,
    mod_revision: u64,
    version: u64,
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<String, VersionedValue>,
    /// Global revision counter, bumped once per applied mutation.
    revision: u64,
}

/// A deterministic in-memory key-value store.
///
/// Every write, including the comparison half of a compare-and-swap, runs
/// under one write lock, so writes to the same key are linearizable across
/// tasks.
#[derive(Default)]
pub struct DeterministicKeyValueStore {
    inner: RwLock<Inner>,
}

impl DeterministicKeyValueStore {
    /// Create a new deterministic store wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.data.is_empty()
    }
}

fn check_sizes(command: &WriteCommand) -> Result<(), KeyValueStoreError> {
    let key_len = command.key().len();
    if key_len > MAX_KEY_SIZE as usize {
        return Err(KeyValueStoreError::KeyTooLarge {
            size: key_len,
            max: MAX_KEY_SIZE,
        });
    }
    if let Some(value) = command.value()
        && value.len() > MAX_VALUE_SIZE as usize
    {
        return Err(KeyValueStoreError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

impl Inner {
    fn put(&mut self, key: &str, value: &str) -> u64 {
        self.revision += 1;
        let revision = self.revision;
        match self.data.get_mut(key) {
            Some(existing) => {
                existing.value = value.to_string();
                existing.mod_revision = revision;
                existing.version += 1;
            }
            None => {
                self.data.insert(key.to_string(), VersionedValue {
                    value: value.to_string(),
                    create_revision: revision,
                    mod_revision: revision,
                    version: 1,
                });
            }
        }
        revision
    }
}

#[async_trait]
impl KeyValueStore for DeterministicKeyValueStore {
    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        let inner = self.inner.read().await;
        let kv = inner.data.get(&request.key).map(|versioned| KeyValueWithRevision {
            key: request.key.clone(),
            value: versioned.value.clone(),
            create_revision: versioned.create_revision,
            mod_revision: versioned.mod_revision,
            version: versioned.version,
        });
        Ok(ReadResult { kv })
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        check_sizes(&request.command)?;
        let mut inner = self.inner.write().await;

        let revision = match &request.command {
            WriteCommand::Set { key, value } => inner.put(key, value),
            WriteCommand::Delete { key } => {
                inner.data.remove(key);
                inner.revision += 1;
                inner.revision
            }
            WriteCommand::CompareAndSwap {
                key,
                expected,
                new_value,
            } => {
                let current = inner.data.get(key).map(|v| v.value.clone());
                if current.as_ref() != expected.as_ref() {
                    return Err(KeyValueStoreError::CompareAndSwapFailed {
                        key: key.clone(),
                        expected: expected.clone(),
                        actual: current,
                    });
                }
                inner.put(key, new_value)
            }
        };

        Ok(WriteResult {
            command: request.command,
            revision,
        })
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        let mut inner = self.inner.write().await;
        let is_deleted = inner.data.remove(&request.key).is_some();
        if is_deleted {
            inner.revision += 1;
        }
        Ok(DeleteResult {
            key: request.key,
            is_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_missing_key() {
        let store = DeterministicKeyValueStore::new();
        let result = store.read(ReadRequest::new("missing")).await.unwrap();
        assert!(result.kv.is_none());
    }

    #[tokio::test]
    async fn test_set_and_read() {
        let store = DeterministicKeyValueStore::new();
        store.write(WriteRequest::set("k", "v1")).await.unwrap();
        store.write(WriteRequest::set("k", "v2")).await.unwrap();

        let kv = store.read(ReadRequest::new("k")).await.unwrap().kv.unwrap();
        assert_eq!(kv.value, "v2");
        assert_eq!(kv.version, 2);
        assert_eq!(kv.create_revision, 1);
        assert_eq!(kv.mod_revision, 2);
    }

    #[tokio::test]
    async fn test_cas_create_if_absent() {
        let store = DeterministicKeyValueStore::new();
        store.write(WriteRequest::compare_and_swap("k", None, "first")).await.unwrap();

        let err = store.write(WriteRequest::compare_and_swap("k", None, "second")).await.unwrap_err();
        assert_eq!(err, KeyValueStoreError::CompareAndSwapFailed {
            key: "k".to_string(),
            expected: None,
            actual: Some("first".to_string()),
        });

        let value = store.read(ReadRequest::new("k")).await.unwrap();
        assert_eq!(value.value(), Some("first"));
    }

    #[tokio::test]
    async fn test_cas_swap_on_match() {
        let store = DeterministicKeyValueStore::new();
        store.write(WriteRequest::set("k", "a")).await.unwrap();
        store.write(WriteRequest::compare_and_swap("k", Some("a".to_string()), "b")).await.unwrap();

        let err = store.write(WriteRequest::compare_and_swap("k", Some("a".to_string()), "c")).await.unwrap_err();
        assert!(err.is_cas_conflict());
        assert_eq!(store.read(ReadRequest::new("k")).await.unwrap().value(), Some("b"));
    }

    #[tokio::test]
    async fn test_cas_on_missing_key_with_expected_value_fails() {
        let store = DeterministicKeyValueStore::new();
        let err = store.write(WriteRequest::compare_and_swap("k", Some("a".to_string()), "b")).await.unwrap_err();
        assert!(err.is_cas_conflict());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = DeterministicKeyValueStore::new();
        store.write(WriteRequest::set("k", "v")).await.unwrap();

        assert!(store.delete(DeleteRequest::new("k")).await.unwrap().is_deleted);
        assert!(!store.delete(DeleteRequest::new("k")).await.unwrap().is_deleted);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversize_key_rejected() {
        let store = DeterministicKeyValueStore::new();
        let key = "k".repeat(MAX_KEY_SIZE as usize + 1);
        let err = store.write(WriteRequest::set(key, "v")).await.unwrap_err();
        assert!(matches!(err, KeyValueStoreError::KeyTooLarge { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_cas_single_winner() {
        let store = DeterministicKeyValueStore::new();
        let mut handles = Vec::new();
        for i in 0..10 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.write(WriteRequest::compare_and_swap("race", None, format!("w{i}"))).await
            }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
