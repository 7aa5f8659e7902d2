//! Size bounds enforced by every store implementation.
//!
//! Fixed limits keep a single runaway document (for example a counter
//! document whose pending reservations are never committed) from growing
//! without bound.

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: u32 = 1024;

/// Maximum value size in bytes (1 MiB).
pub const MAX_VALUE_SIZE: u32 = 1024 * 1024;

const _: () = assert!(MAX_KEY_SIZE > 0);
const _: () = assert!(MAX_VALUE_SIZE >= MAX_KEY_SIZE);
