//! Stable ID allocator built on compare-and-swap document updates.
//!
//! Small integer IDs are handed out in two phases against one JSON counter
//! document per namespace:
//!
//! - **Reserve** takes IDs from the free list (most recently returned first),
//!   mints the rest from `nextValue`, and records them under a caller-chosen
//!   reservation ID.
//! - **Commit** returns the IDs the caller did not use to the free list and
//!   closes the reservation.
//!
//! Both run as a single read / pure transform / compare-and-swap cycle, so
//! concurrent callers never receive the same ID and a lost race leaves no
//! partial state.
//!
//! - [`StableIdRegistry`] - reserve and commit with retry on conflict
//! - [`ReservationPool`] - leases single IDs out of batched reservations
//! - [`StableIdAssigner`] - binds entity UIDs to stable IDs exactly once
//!
//! ## Example
//!
//! ```ignore
//! use stableid::{CommitRequest, ReserveRequest, StableIdRegistry, RegistryConfig};
//!
//! let registry = StableIdRegistry::new(store, RegistryConfig::default());
//! let key = stableid::pure::marker_key("project", 0);
//!
//! let reservation = registry.reserve(&key, &ReserveRequest::new("r1", 3)).await?;
//! // use reservation.reserved_ids[0], hand the rest back
//! let unused = reservation.reserved_ids[1..].to_vec();
//! registry.commit(&key, &CommitRequest::single("r1", unused)).await?;
//! ```

mod assigner;
mod config;
pub mod constants;
mod document;
mod error;
mod pool;
pub mod pure;
mod registry;
mod request;

pub use assigner::AssignedStableId;
pub use assigner::RegisteredEntity;
pub use assigner::StableIdAssigner;
pub use assigner::StableIdItem;
pub use config::ConfigError;
pub use config::PoolConfig;
pub use config::RegistryConfig;
pub use config::StableIdConfig;
pub use document::CounterDocument;
pub use document::PendingReservation;
pub use error::StableIdError;
pub use pool::IdLease;
pub use pool::PoolStats;
pub use pool::ReservationPool;
pub use registry::StableIdRegistry;
pub use request::CommitParams;
pub use request::CommitRequest;
pub use request::ReserveParams;
pub use request::ReserveRequest;
