//! Client-side pool that leases IDs one at a time from reservations.
//!
//! The pool reserves IDs in batches and hands them out individually. Each
//! leased ID is either committed (used) or returned (handed out again).
//! A reservation whose IDs have all been committed is closed with a commit
//! carrying no unused IDs the next time the pool refills; [`finalize`]
//! closes everything else and returns the never-used IDs to the free list.
//!
//! [`finalize`]: ReservationPool::finalize

use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use stableid_kv::KeyValueStore;
use tracing::debug;
use tracing::info;

use crate::constants::MAX_RESERVE_COUNT;
use crate::error::StableIdError;
use crate::registry::StableIdRegistry;
use crate::request::CommitRequest;
use crate::request::ReserveRequest;

/// An ID handed out by a [`ReservationPool`].
///
/// Pass it back to [`ReservationPool::commit_id`] once the ID is in use, or
/// to [`ReservationPool::return_id`] if it is not needed after all.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a lease must be committed or returned"]
pub struct IdLease {
    /// Reservation the ID came from.
    pub reservation_id: String,
    /// The leased ID.
    pub id: u32,
}

/// Local view of one reservation.
#[derive(Debug)]
struct ReservationNode {
    reservation_id: String,
    /// Not yet handed out; returned IDs go to the front.
    remaining: VecDeque<u32>,
    /// Handed out, neither committed nor returned.
    leased: BTreeSet<u32>,
}

impl ReservationNode {
    fn new(reservation_id: String, reserved_ids: Vec<u32>) -> Self {
        Self {
            reservation_id,
            remaining: reserved_ids.into(),
            leased: BTreeSet::new(),
        }
    }

    fn try_take(&mut self) -> Option<IdLease> {
        let id = self.remaining.pop_front()?;
        self.leased.insert(id);
        Some(IdLease {
            reservation_id: self.reservation_id.clone(),
            id,
        })
    }

    /// Every reserved ID has been committed.
    fn is_completed(&self) -> bool {
        self.remaining.is_empty() && self.leased.is_empty()
    }
}

/// Leases IDs for one counter document.
pub struct ReservationPool<S: KeyValueStore + ?Sized> {
    registry: Arc<StableIdRegistry<S>>,
    key: String,
    reserve_count: u32,
    /// Reservations, oldest first.
    nodes: Mutex<Vec<ReservationNode>>,
    /// Serializes refills and finalization so concurrent takers share one reserve.
    refill: tokio::sync::Mutex<()>,
}

impl<S: KeyValueStore + ?Sized> ReservationPool<S> {
    /// Create a pool for the counter document at `key`.
    pub fn new(registry: Arc<StableIdRegistry<S>>, key: impl Into<String>, reserve_count: u32) -> Result<Self, StableIdError> {
        let key = key.into();
        if key.is_empty() {
            return Err(StableIdError::invalid("pool key must not be empty"));
        }
        if reserve_count == 0 || reserve_count > MAX_RESERVE_COUNT {
            return Err(StableIdError::invalid(format!(
                "pool reserve count {reserve_count} must be between 1 and {MAX_RESERVE_COUNT}"
            )));
        }

        Ok(Self {
            registry,
            key,
            reserve_count,
            nodes: Mutex::new(Vec::new()),
            refill: tokio::sync::Mutex::new(()),
        })
    }

    /// Counter document key this pool allocates from.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lease one ID, reserving a new batch when every held reservation is exhausted.
    pub async fn take(&self) -> Result<IdLease, StableIdError> {
        loop {
            if let Some(lease) = self.try_take_local() {
                return Ok(lease);
            }

            let _refill = self.refill.lock().await;
            if let Some(lease) = self.try_take_local() {
                return Ok(lease);
            }
            self.refill_locked().await?;
        }
    }

    /// Mark a leased ID as used.
    pub fn commit_id(&self, lease: &IdLease) -> Result<(), StableIdError> {
        let mut nodes = self.nodes();
        let node = find_leased(&mut nodes, lease)?;
        node.leased.remove(&lease.id);
        Ok(())
    }

    /// Give a leased ID back so it is handed out again.
    pub fn return_id(&self, lease: IdLease) -> Result<(), StableIdError> {
        let mut nodes = self.nodes();
        let node = find_leased(&mut nodes, &lease)?;
        node.leased.remove(&lease.id);
        node.remaining.push_front(lease.id);
        Ok(())
    }

    /// Close reservations whose IDs have all been committed.
    ///
    /// Returns the number of reservations closed.
    pub async fn commit_completed(&self) -> Result<usize, StableIdError> {
        let _refill = self.refill.lock().await;
        self.commit_completed_locked().await
    }

    /// Close every reservation, returning IDs that were never handed out to
    /// the free list.
    ///
    /// IDs still leased at this point are treated as used and are not
    /// returned; leases from before the call can no longer be committed or
    /// returned afterwards. If the commit fails the reservations are kept
    /// and the pool is usable as before.
    pub async fn finalize(&self) -> Result<(), StableIdError> {
        let _refill = self.refill.lock().await;

        // Detach the nodes so no lease can reach the IDs being freed while the commit runs.
        let detached = std::mem::take(&mut *self.nodes());
        if detached.is_empty() {
            return Ok(());
        }

        let reservation_ids: Vec<String> = detached.iter().map(|n| n.reservation_id.clone()).collect();
        let unused_ids: Vec<u32> = detached.iter().flat_map(|n| n.remaining.iter().copied()).collect();
        let outstanding: usize = detached.iter().map(|n| n.leased.len()).sum();

        let request = CommitRequest::new(reservation_ids, unused_ids);
        if let Err(e) = self.registry.commit(&self.key, &request).await {
            let mut nodes = self.nodes();
            let newer = std::mem::replace(&mut *nodes, detached);
            nodes.extend(newer);
            return Err(e);
        }

        info!(
            key = %self.key,
            reservations = request.reservation_ids.len(),
            unused = request.unused_ids.len(),
            outstanding,
            "finalized reservation pool"
        );
        Ok(())
    }

    /// IDs available without reserving, and IDs currently leased.
    pub fn stats(&self) -> PoolStats {
        let nodes = self.nodes();
        PoolStats {
            reservations: nodes.len(),
            available: nodes.iter().map(|n| n.remaining.len()).sum(),
            leased: nodes.iter().map(|n| n.leased.len()).sum(),
        }
    }

    fn nodes(&self) -> MutexGuard<'_, Vec<ReservationNode>> {
        // Node state is updated in single steps, so a poisoned guard is still consistent.
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take from the newest reservation first, falling back to older ones.
    fn try_take_local(&self) -> Option<IdLease> {
        self.nodes().iter_mut().rev().find_map(ReservationNode::try_take)
    }

    async fn refill_locked(&self) -> Result<(), StableIdError> {
        let request = ReserveRequest::with_generated_id(self.reserve_count);
        let reservation = self.registry.reserve(&self.key, &request).await?;
        debug!(
            key = %self.key,
            reservation_id = %reservation.reservation_id,
            count = reservation.reserved_ids.len(),
            "refilled reservation pool"
        );
        self.nodes().push(ReservationNode::new(reservation.reservation_id, reservation.reserved_ids));

        self.commit_completed_locked().await?;
        Ok(())
    }

    async fn commit_completed_locked(&self) -> Result<usize, StableIdError> {
        let completed: Vec<String> = self
            .nodes()
            .iter()
            .filter(|n| n.is_completed())
            .map(|n| n.reservation_id.clone())
            .collect();
        if completed.is_empty() {
            return Ok(0);
        }

        let request = CommitRequest::new(completed, Vec::new());
        self.registry.commit(&self.key, &request).await?;

        // Completed nodes have no leases, so nothing can have changed them meanwhile.
        self.nodes().retain(|n| !request.reservation_ids.contains(&n.reservation_id));
        Ok(request.reservation_ids.len())
    }
}

fn find_leased<'a>(nodes: &'a mut [ReservationNode], lease: &IdLease) -> Result<&'a mut ReservationNode, StableIdError> {
    nodes
        .iter_mut()
        .find(|n| n.reservation_id == lease.reservation_id && n.leased.contains(&lease.id))
        .ok_or_else(|| {
            StableIdError::invalid(format!(
                "id {} is not leased from reservation '{}'",
                lease.id, lease.reservation_id
            ))
        })
}

/// Snapshot of a pool's local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Reservations held open.
    pub reservations: usize,
    /// IDs ready to lease.
    pub available: usize,
    /// IDs leased and not yet committed or returned.
    pub leased: usize,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use stableid_kv::DeleteRequest;
    use stableid_kv::DeleteResult;
    use stableid_kv::DeterministicKeyValueStore;
    use stableid_kv::KeyValueStoreError;
    use stableid_kv::ReadRequest;
    use stableid_kv::ReadResult;
    use stableid_kv::WriteRequest;
    use stableid_kv::WriteResult;

    use super::*;
    use crate::config::RegistryConfig;

    /// Delays every write so other tasks run while a commit is in flight.
    struct SlowStore {
        inner: Arc<DeterministicKeyValueStore>,
        delay: Duration,
    }

    #[async_trait]
    impl KeyValueStore for SlowStore {
        async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.write(request).await
        }

        async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
            self.inner.read(request).await
        }

        async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
            self.inner.delete(request).await
        }
    }

    /// Rejects writes while `failing` is set.
    struct FlakyStore {
        inner: Arc<DeterministicKeyValueStore>,
        failing: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(KeyValueStoreError::Failed {
                    reason: "unavailable".to_string(),
                });
            }
            self.inner.write(request).await
        }

        async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
            self.inner.read(request).await
        }

        async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
            self.inner.delete(request).await
        }
    }

    const KEY: &str = "__stableid:marker:pool#0";

    fn registry() -> Arc<StableIdRegistry<DeterministicKeyValueStore>> {
        Arc::new(StableIdRegistry::new(DeterministicKeyValueStore::new(), RegistryConfig {
            max_cas_retries: 100,
            cas_initial_backoff_ms: 0,
            cas_max_backoff_ms: 1,
        }))
    }

    #[tokio::test]
    async fn test_take_reserves_lazily() {
        let registry = registry();
        let pool = ReservationPool::new(registry.clone(), KEY, 3).unwrap();
        assert!(registry.read_document(KEY).await.unwrap().is_none());

        let lease = pool.take().await.unwrap();
        assert_eq!(lease.id, 0);
        assert_eq!(pool.stats(), PoolStats {
            reservations: 1,
            available: 2,
            leased: 1,
        });

        let doc = registry.read_document(KEY).await.unwrap().unwrap();
        assert_eq!(doc.pending_reservations.len(), 1);
        assert_eq!(doc.pending_reservations[0].reservation_id, lease.reservation_id);
    }

    #[tokio::test]
    async fn test_returned_id_is_handed_out_again() {
        let pool = ReservationPool::new(registry(), KEY, 5).unwrap();
        let first = pool.take().await.unwrap();
        let second = pool.take().await.unwrap();
        assert_eq!((first.id, second.id), (0, 1));

        pool.return_id(second).unwrap();
        let again = pool.take().await.unwrap();
        assert_eq!(again.id, 1);
    }

    #[tokio::test]
    async fn test_completed_reservations_committed_on_refill() {
        let registry = registry();
        let pool = ReservationPool::new(registry.clone(), KEY, 2).unwrap();

        for _ in 0..2 {
            let lease = pool.take().await.unwrap();
            pool.commit_id(&lease).unwrap();
        }
        let third = pool.take().await.unwrap();
        assert_eq!(third.id, 2);

        let pending = registry.pending_reservations(KEY).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reservation_id, third.reservation_id);
        assert_eq!(pool.stats().reservations, 1);
    }

    #[tokio::test]
    async fn test_partially_used_reservation_stays_open() {
        let registry = registry();
        let pool = ReservationPool::new(registry.clone(), KEY, 2).unwrap();

        let a = pool.take().await.unwrap();
        let b = pool.take().await.unwrap();
        pool.commit_id(&a).unwrap();
        let c = pool.take().await.unwrap();
        assert_ne!(c.reservation_id, b.reservation_id);

        assert_eq!(registry.pending_reservations(KEY).await.unwrap().len(), 2);

        pool.commit_id(&b).unwrap();
        assert_eq!(pool.commit_completed().await.unwrap(), 1);
        assert_eq!(registry.pending_reservations(KEY).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_returns_unused_ids() {
        let registry = registry();
        let pool = ReservationPool::new(registry.clone(), KEY, 4).unwrap();

        let used = pool.take().await.unwrap();
        pool.commit_id(&used).unwrap();
        let unused = pool.take().await.unwrap();
        pool.return_id(unused).unwrap();

        pool.finalize().await.unwrap();

        let doc = registry.read_document(KEY).await.unwrap().unwrap();
        assert!(doc.pending_reservations.is_empty());
        let free: HashSet<u32> = doc.free_list.iter().copied().collect();
        assert_eq!(free, HashSet::from([1, 2, 3]));
        assert_eq!(pool.stats().reservations, 0);

        // Next pool reuses the freed IDs before minting.
        let next = ReservationPool::new(registry.clone(), KEY, 3).unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(next.take().await.unwrap().id);
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_finalize_empty_pool_is_noop() {
        let registry = registry();
        let pool = ReservationPool::new(registry.clone(), KEY, 4).unwrap();
        pool.finalize().await.unwrap();
        assert!(registry.read_document(KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_lease_rejected() {
        let pool = ReservationPool::new(registry(), KEY, 4).unwrap();
        let lease = pool.take().await.unwrap();
        pool.commit_id(&lease).unwrap();

        let err = pool.commit_id(&lease).unwrap_err();
        assert!(matches!(err, StableIdError::InvalidArgument { .. }));

        let forged = IdLease {
            reservation_id: "someone-else".to_string(),
            id: 1,
        };
        assert!(pool.return_id(forged).is_err());
    }

    #[tokio::test]
    async fn test_invalid_pool_arguments() {
        assert!(ReservationPool::new(registry(), KEY, 0).is_err());
        assert!(ReservationPool::new(registry(), "", 4).is_err());
        assert!(ReservationPool::new(registry(), KEY, MAX_RESERVE_COUNT + 1).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_takes_unique() {
        let registry = registry();
        let pool = Arc::new(ReservationPool::new(registry.clone(), KEY, 7).unwrap());

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let p = Arc::clone(&pool);
                tokio::spawn(async move {
                    let mut ids = Vec::new();
                    for _ in 0..10 {
                        let lease = p.take().await.unwrap();
                        p.commit_id(&lease).unwrap();
                        ids.push(lease.id);
                    }
                    ids
                })
            })
            .collect();

        let mut all_ids = HashSet::new();
        for h in handles {
            for id in h.await.unwrap() {
                assert!(all_ids.insert(id), "Duplicate ID: {}", id);
            }
        }
        assert_eq!(all_ids.len(), 60);

        pool.finalize().await.unwrap();
        let doc = registry.read_document(KEY).await.unwrap().unwrap();
        assert!(doc.pending_reservations.is_empty());
        assert!(doc.is_consistent());
        assert_eq!(doc.next_value as usize, 60 + doc.free_list.len());
    }

    #[tokio::test]
    async fn test_take_during_finalize_never_leases_freed_id() {
        let store = Arc::new(SlowStore {
            inner: DeterministicKeyValueStore::new(),
            delay: Duration::from_millis(50),
        });
        let registry = Arc::new(StableIdRegistry::new(store, RegistryConfig {
            max_cas_retries: 100,
            cas_initial_backoff_ms: 0,
            cas_max_backoff_ms: 1,
        }));
        let pool = Arc::new(ReservationPool::new(Arc::clone(&registry), KEY, 4).unwrap());

        let used = pool.take().await.unwrap();
        pool.commit_id(&used).unwrap();

        let finalizing = {
            let p = Arc::clone(&pool);
            tokio::spawn(async move { p.finalize().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lease = pool.take().await.unwrap();
        finalizing.await.unwrap().unwrap();

        let doc = registry.read_document(KEY).await.unwrap().unwrap();
        assert!(!doc.free_list.contains(&lease.id), "leased id {} is on the free list", lease.id);
        assert_ne!(lease.id, used.id);
        assert!(doc.is_consistent());
        pool.commit_id(&lease).unwrap();

        // Another client drains the free list without meeting the live lease.
        let other = ReservationPool::new(Arc::clone(&registry), KEY, 4).unwrap();
        for _ in 0..4 {
            let next = other.take().await.unwrap();
            assert_ne!(next.id, lease.id);
            assert_ne!(next.id, used.id);
        }
    }

    #[tokio::test]
    async fn test_failed_finalize_keeps_reservations() {
        let store = Arc::new(FlakyStore {
            inner: DeterministicKeyValueStore::new(),
            failing: std::sync::atomic::AtomicBool::new(false),
        });
        let registry = Arc::new(StableIdRegistry::new(Arc::clone(&store), RegistryConfig {
            max_cas_retries: 2,
            cas_initial_backoff_ms: 0,
            cas_max_backoff_ms: 1,
        }));
        let pool = ReservationPool::new(Arc::clone(&registry), KEY, 3).unwrap();
        let lease = pool.take().await.unwrap();

        store.failing.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = pool.finalize().await.unwrap_err();
        assert!(matches!(err, StableIdError::Storage { .. }));
        assert_eq!(pool.stats(), PoolStats {
            reservations: 1,
            available: 2,
            leased: 1,
        });

        store.failing.store(false, std::sync::atomic::Ordering::SeqCst);
        pool.return_id(lease).unwrap();
        pool.finalize().await.unwrap();

        let doc = registry.read_document(KEY).await.unwrap().unwrap();
        assert!(doc.pending_reservations.is_empty());
        let mut free = doc.free_list.clone();
        free.sort_unstable();
        assert_eq!(free, vec![0, 1, 2]);
    }
}
