//! Pure functions for the stable ID allocator.
//!
//! Every document mutation is written as a deterministic transform of
//! "current document + parameters" into "new document + result", with the
//! current time passed in. The imperative shell in
//! [`StableIdRegistry`](crate::StableIdRegistry) reads, applies one of these,
//! and publishes with compare-and-swap; a lost race simply recomputes from
//! the fresh document.
//!
//! # Module Organization
//!
//! - [`allocator`]: free-list draining, minting, reserve and commit transforms
//! - [`keys`]: document key layout
//! - [`backoff`]: CAS retry backoff with jitter
//!
//! # Tiger Style
//!
//! - Checked arithmetic on the counter (overflow is reported, never wrapped)
//! - No I/O, no clock reads, no panics

pub mod allocator;
pub mod backoff;
pub mod keys;

pub use allocator::ReserveResult;
pub use allocator::compute_commit;
pub use allocator::compute_reserve;
pub use allocator::drain_free_list;
pub use allocator::mint_ids;
pub use allocator::remove_reservations;
pub use backoff::BackoffResult;
pub use backoff::compute_backoff_with_jitter;
pub use keys::entity_key;
pub use keys::marker_key;
