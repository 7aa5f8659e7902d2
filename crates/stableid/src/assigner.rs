//! Bind entity UIDs to stable IDs.
//!
//! Each entity gets a registration record at
//! `__stableid:entity:{collection}:{uid}` created with compare-and-swap
//! against an absent key. The first writer wins; everyone else reads the
//! stored stable ID and hands their tentative ID back to the pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use stableid_kv::KeyValueStore;
use stableid_kv::KeyValueStoreError;
use stableid_kv::ReadRequest;
use stableid_kv::WriteRequest;
use tracing::debug;

use crate::config::PoolConfig;
use crate::error::StableIdError;
use crate::pool::IdLease;
use crate::pool::ReservationPool;
use crate::pure::entity_key;
use crate::pure::marker_key;
use crate::registry::StableIdRegistry;

/// An entity that needs a stable ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StableIdItem {
    /// Collection the entity belongs to.
    pub collection: String,
    /// Stable ID group; each group has its own ID space.
    pub group: u8,
    /// The entity's unique identifier.
    pub uid: String,
}

impl StableIdItem {
    pub fn new(collection: impl Into<String>, group: u8, uid: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            group,
            uid: uid.into(),
        }
    }
}

/// Stable ID assigned to one [`StableIdItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedStableId {
    pub uid: String,
    pub stable_id: u32,
    /// `true` if this call registered the entity, `false` if it already had an ID.
    pub is_added: bool,
}

/// Registration record stored per entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredEntity {
    pub uid: String,
    pub stable_id: u32,
    pub stable_id_group: u8,
    pub date_added: DateTime<Utc>,
}

type PoolKey = (String, u8);

/// Assigns stable IDs, keeping one [`ReservationPool`] per collection and group.
pub struct StableIdAssigner<S: KeyValueStore + ?Sized> {
    registry: Arc<StableIdRegistry<S>>,
    reserve_count: u32,
    pools: Mutex<HashMap<PoolKey, Arc<ReservationPool<S>>>>,
}

impl<S: KeyValueStore + ?Sized> StableIdAssigner<S> {
    pub fn new(registry: Arc<StableIdRegistry<S>>, config: &PoolConfig) -> Result<Self, StableIdError> {
        config.validate()?;
        Ok(Self {
            registry,
            reserve_count: config.reserve_count,
            pools: Mutex::new(HashMap::new()),
        })
    }

    /// Give every item a stable ID, in input order.
    ///
    /// Items already registered keep their stored ID. An item listed twice
    /// gets the same ID both times.
    pub async fn assign(&self, items: &[StableIdItem]) -> Result<Vec<AssignedStableId>, StableIdError> {
        for item in items {
            validate_item(item)?;
        }

        let mut assigned = Vec::with_capacity(items.len());
        for item in items {
            assigned.push(self.assign_one(item).await?);
        }
        Ok(assigned)
    }

    /// Look up an entity's registration without assigning anything.
    pub async fn registered(&self, collection: &str, uid: &str) -> Result<Option<RegisteredEntity>, StableIdError> {
        let key = entity_key(collection, uid);
        match self.read_raw(&key).await? {
            Some(raw) => parse_entity(&key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Finalize every pool, returning unused IDs to their free lists.
    pub async fn finalize(&self) -> Result<(), StableIdError> {
        let pools: Vec<Arc<ReservationPool<S>>> = self.pools().values().cloned().collect();
        for pool in pools {
            pool.finalize().await?;
        }
        Ok(())
    }

    async fn assign_one(&self, item: &StableIdItem) -> Result<AssignedStableId, StableIdError> {
        let pool = self.pool(&item.collection, item.group)?;
        let lease = pool.take().await?;

        match self.register(item, &lease).await {
            Ok(None) => {
                pool.commit_id(&lease)?;
                debug!(collection = %item.collection, uid = %item.uid, stable_id = lease.id, "registered entity");
                Ok(AssignedStableId {
                    uid: item.uid.clone(),
                    stable_id: lease.id,
                    is_added: true,
                })
            }
            Ok(Some(existing)) => {
                pool.return_id(lease)?;
                Ok(AssignedStableId {
                    uid: item.uid.clone(),
                    stable_id: existing.stable_id,
                    is_added: false,
                })
            }
            Err(e) => {
                // A concurrent finalize may already have released the lease.
                if pool.return_id(lease).is_err() {
                    debug!(collection = %item.collection, uid = %item.uid, "lease dropped by finalize");
                }
                Err(e)
            }
        }
    }

    /// Create the registration record; `Some` holds the record that was already there.
    async fn register(&self, item: &StableIdItem, lease: &IdLease) -> Result<Option<RegisteredEntity>, StableIdError> {
        let key = entity_key(&item.collection, &item.uid);
        let record = RegisteredEntity {
            uid: item.uid.clone(),
            stable_id: lease.id,
            stable_id_group: item.group,
            date_added: Utc::now(),
        };
        let value = serde_json::to_string(&record)?;

        match self.registry.store().write(WriteRequest::compare_and_swap(&key, None, value)).await {
            Ok(_) => Ok(None),
            Err(KeyValueStoreError::CompareAndSwapFailed { actual, .. }) => {
                let raw = match actual {
                    Some(raw) => raw,
                    None => self.read_raw(&key).await?.ok_or_else(|| StableIdError::CorruptedData {
                        key: key.clone(),
                        reason: "registration vanished after a failed create".to_string(),
                    })?,
                };
                parse_entity(&key, &raw).map(Some)
            }
            Err(source) => Err(StableIdError::Storage { source }),
        }
    }

    async fn read_raw(&self, key: &str) -> Result<Option<String>, StableIdError> {
        match self.registry.store().read(ReadRequest::new(key)).await {
            Ok(result) => Ok(result.kv.map(|kv| kv.value)),
            Err(KeyValueStoreError::NotFound { .. }) => Ok(None),
            Err(source) => Err(StableIdError::Storage { source }),
        }
    }

    fn pool(&self, collection: &str, group: u8) -> Result<Arc<ReservationPool<S>>, StableIdError> {
        let mut pools = self.pools();
        if let Some(pool) = pools.get(&(collection.to_string(), group)) {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(ReservationPool::new(
            Arc::clone(&self.registry),
            marker_key(collection, group),
            self.reserve_count,
        )?);
        pools.insert((collection.to_string(), group), Arc::clone(&pool));
        Ok(pool)
    }

    fn pools(&self) -> std::sync::MutexGuard<'_, HashMap<PoolKey, Arc<ReservationPool<S>>>> {
        self.pools.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_item(item: &StableIdItem) -> Result<(), StableIdError> {
    if item.collection.is_empty() {
        return Err(StableIdError::invalid(format!("collection for uid '{}' must not be empty", item.uid)));
    }
    if item.uid.is_empty() {
        return Err(StableIdError::invalid(format!("uid in collection '{}' must not be empty", item.collection)));
    }
    Ok(())
}

fn parse_entity(key: &str, raw: &str) -> Result<RegisteredEntity, StableIdError> {
    serde_json::from_str(raw).map_err(|e| StableIdError::CorruptedData {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
