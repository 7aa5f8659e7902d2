//! Reserve and commit against a counter document.
//!
//! Each operation is one read, one pure transform from [`crate::pure`], and
//! one compare-and-swap whose expected value is the exact JSON that was
//! read. A lost race discards the attempt and recomputes from the fresh
//! document, so a failed attempt never leaves a partial mutation behind.
//!
//! # Properties
//!
//! 1. **No double allocation**: IDs returned by any two reserves on one
//!    document are disjoint while both reservations are outstanding
//! 2. **Monotonic counter**: `nextValue` never decreases
//! 3. **LIFO reuse**: the most recently returned ID is reused first
//! 4. **Replayable commit**: committing an absent reservation is a no-op

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stableid_kv::KeyValueStore;
use stableid_kv::KeyValueStoreError;
use stableid_kv::ReadRequest;
use stableid_kv::WriteRequest;
use tracing::debug;

use crate::config::RegistryConfig;
use crate::document::CounterDocument;
use crate::document::PendingReservation;
use crate::error::StableIdError;
use crate::pure;
use crate::pure::ReserveResult;
use crate::request::CommitRequest;
use crate::request::ReserveRequest;

/// Document as read, with the raw value used as the CAS expectation.
struct Snapshot {
    expected: Option<String>,
    document: Option<CounterDocument>,
}

/// Allocator over counter documents held in a [`KeyValueStore`].
///
/// One registry serves any number of documents; calls on different keys
/// are independent.
pub struct StableIdRegistry<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    config: RegistryConfig,
}

impl<S: KeyValueStore + ?Sized> StableIdRegistry<S> {
    /// Create a new registry.
    pub fn new(store: Arc<S>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    /// Create a registry, rejecting an invalid configuration.
    pub fn try_new(store: Arc<S>, config: RegistryConfig) -> Result<Self, StableIdError> {
        config.validate()?;
        Ok(Self::new(store, config))
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Reserve IDs, retrying lost races per the configured policy.
    ///
    /// Returns the reservation record appended to `pendingReservations`;
    /// its `reserved_ids` are the allocated IDs, reused free-list entries
    /// first (most recently freed first) followed by fresh ascending IDs.
    pub async fn reserve(&self, key: &str, request: &ReserveRequest) -> Result<PendingReservation, StableIdError> {
        request.validate()?;
        self.retry_on_conflict(key, "reserve", || self.reserve_attempt(key, request)).await
    }

    /// Reserve IDs with a single attempt.
    ///
    /// Fails with [`StableIdError::Conflict`] if a concurrent writer got
    /// there first; the caller owns the retry.
    pub async fn try_reserve(&self, key: &str, request: &ReserveRequest) -> Result<PendingReservation, StableIdError> {
        request.validate()?;
        self.reserve_attempt(key, request).await
    }

    /// Return unused IDs to the free list and close reservations, retrying
    /// lost races per the configured policy.
    pub async fn commit(&self, key: &str, request: &CommitRequest) -> Result<(), StableIdError> {
        request.validate()?;
        self.retry_on_conflict(key, "commit", || self.commit_attempt(key, request)).await
    }

    /// Commit with a single attempt.
    pub async fn try_commit(&self, key: &str, request: &CommitRequest) -> Result<(), StableIdError> {
        request.validate()?;
        self.commit_attempt(key, request).await
    }

    /// Read the current counter document, `None` if it was never created.
    pub async fn read_document(&self, key: &str) -> Result<Option<CounterDocument>, StableIdError> {
        Ok(self.read_snapshot(key).await?.document)
    }

    /// Outstanding reservations on a document, oldest first.
    ///
    /// Reservations never expire; this is how an operator finds ones whose
    /// caller went away before committing.
    pub async fn pending_reservations(&self, key: &str) -> Result<Vec<PendingReservation>, StableIdError> {
        Ok(self.read_document(key).await?.map(|doc| doc.pending_reservations).unwrap_or_default())
    }

    async fn reserve_attempt(&self, key: &str, request: &ReserveRequest) -> Result<PendingReservation, StableIdError> {
        let reservation = self
            .apply(key, |current| {
                match pure::compute_reserve(current, &request.reservation_id, request.reserve_count, Utc::now()) {
                    ReserveResult::Success { document, reservation } => Ok((document, reservation)),
                    ReserveResult::Overflow => Err(StableIdError::IdSpaceExhausted { key: key.to_string() }),
                }
            })
            .await?;

        debug!(
            key,
            reservation_id = %reservation.reservation_id,
            count = reservation.reserved_ids.len(),
            "reserved stable ids"
        );
        Ok(reservation)
    }

    async fn commit_attempt(&self, key: &str, request: &CommitRequest) -> Result<(), StableIdError> {
        self.apply(key, |current| {
            let document = pure::compute_commit(current, &request.reservation_ids, &request.unused_ids);
            Ok((document, ()))
        })
        .await?;

        debug!(
            key,
            reservations = request.reservation_ids.len(),
            unused = request.unused_ids.len(),
            "committed reservations"
        );
        Ok(())
    }

    /// Read, transform, and conditionally publish one document.
    async fn apply<T>(
        &self,
        key: &str,
        transform: impl FnOnce(Option<CounterDocument>) -> Result<(CounterDocument, T), StableIdError>,
    ) -> Result<T, StableIdError> {
        let snapshot = self.read_snapshot(key).await?;
        let (document, output) = transform(snapshot.document)?;
        let new_value = serde_json::to_string(&document)?;

        match self.store.write(WriteRequest::compare_and_swap(key, snapshot.expected, new_value)).await {
            Ok(_) => Ok(output),
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => Err(StableIdError::Conflict {
                key: key.to_string(),
                attempts: 1,
            }),
            Err(source) => Err(StableIdError::Storage { source }),
        }
    }

    async fn read_snapshot(&self, key: &str) -> Result<Snapshot, StableIdError> {
        let value = match self.store.read(ReadRequest::new(key)).await {
            Ok(result) => result.kv.map(|kv| kv.value),
            Err(KeyValueStoreError::NotFound { .. }) => None,
            Err(source) => return Err(StableIdError::Storage { source }),
        };

        let document: Option<CounterDocument> = match value.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(serde_json::from_str(raw).map_err(|e| StableIdError::CorruptedData {
                key: key.to_string(),
                reason: e.to_string(),
            })?),
        };

        Ok(Snapshot {
            expected: value,
            document,
        })
    }

    async fn retry_on_conflict<T, F, Fut>(&self, key: &str, operation: &str, mut attempt_fn: F) -> Result<T, StableIdError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StableIdError>>,
    {
        let mut attempt = 0u32;
        let mut backoff_ms = self.config.cas_initial_backoff_ms;

        loop {
            match attempt_fn().await {
                Err(StableIdError::Conflict { .. }) => {
                    attempt += 1;
                    if attempt >= self.config.max_cas_retries {
                        return Err(StableIdError::Conflict {
                            key: key.to_string(),
                            attempts: attempt,
                        });
                    }

                    let backoff =
                        pure::compute_backoff_with_jitter(backoff_ms, self.config.cas_max_backoff_ms, rand::random::<u64>());
                    debug!(key, operation, attempt, backoff_ms = backoff.sleep_ms, "CAS conflict, retrying");
                    if backoff.sleep_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(backoff.sleep_ms)).await;
                    }
                    backoff_ms = backoff.next_backoff_ms;
                }
                result => return result,
            }
        }
    }
}
