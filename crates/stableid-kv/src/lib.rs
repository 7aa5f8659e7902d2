//! Document store contract used by the stable ID allocator.
//!
//! The allocator treats the store as a black box that offers atomic
//! read-modify-write on a single document. This crate defines that boundary:
//!
//! - [`KeyValueStore`] - async read / write / delete over string documents
//! - [`WriteCommand::CompareAndSwap`] - the conditional write every allocator
//!   mutation goes through (`expected: None` means create-if-absent)
//! - [`DeterministicKeyValueStore`] - in-memory linearizable implementation
//!
//! Values are opaque UTF-8 strings; the allocator stores JSON in them.

pub mod constants;
mod deterministic;
mod error;
mod read;
mod traits;
mod write;

pub use deterministic::DeterministicKeyValueStore;
pub use error::KeyValueStoreError;
pub use read::DeleteRequest;
pub use read::DeleteResult;
pub use read::KeyValueWithRevision;
pub use read::ReadRequest;
pub use read::ReadResult;
pub use traits::KeyValueStore;
pub use write::WriteCommand;
pub use write::WriteRequest;
pub use write::WriteResult;
