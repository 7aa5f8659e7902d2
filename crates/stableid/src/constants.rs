//! Fixed limits and defaults for the stable ID allocator.

/// Default number of CAS attempts before a reserve/commit gives up.
pub const DEFAULT_MAX_CAS_RETRIES: u32 = 10;

/// Upper bound accepted for `max_cas_retries` in configuration.
pub const MAX_CAS_RETRIES: u32 = 1000;

/// Initial backoff between CAS attempts.
pub const CAS_RETRY_INITIAL_BACKOFF_MS: u64 = 1;

/// Backoff ceiling between CAS attempts.
pub const CAS_RETRY_MAX_BACKOFF_MS: u64 = 128;

/// IDs reserved per batch by a [`ReservationPool`](crate::ReservationPool).
pub const DEFAULT_RESERVE_COUNT: u32 = 20;

/// Largest batch a single reserve may request.
pub const MAX_RESERVE_COUNT: u32 = 10_000;

/// Maximum reservation ID length in bytes.
pub const MAX_RESERVATION_ID_LEN: usize = 256;

const _: () = assert!(DEFAULT_MAX_CAS_RETRIES > 0);
const _: () = assert!(DEFAULT_MAX_CAS_RETRIES <= MAX_CAS_RETRIES);
const _: () = assert!(CAS_RETRY_INITIAL_BACKOFF_MS <= CAS_RETRY_MAX_BACKOFF_MS);
const _: () = assert!(DEFAULT_RESERVE_COUNT > 0);
const _: () = assert!(DEFAULT_RESERVE_COUNT <= MAX_RESERVE_COUNT);
