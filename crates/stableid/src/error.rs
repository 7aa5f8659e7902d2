//! Error types for the stable ID allocator.

use snafu::Snafu;
use stableid_kv::KeyValueStoreError;

use crate::config::ConfigError;

/// Errors from reserve, commit, and the helpers built on them.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StableIdError {
    /// Malformed input, rejected before any document is read or written.
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument {
        /// What was wrong with the input.
        reason: String,
    },

    /// The atomic update kept losing to concurrent writers.
    ///
    /// No document state was changed by the failed attempts.
    #[snafu(display("conflicting update on '{key}' after {attempts} attempts"))]
    Conflict {
        /// The counter document key.
        key: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Minting would move `nextValue` past `u32::MAX`.
    #[snafu(display("stable id space exhausted for key '{key}'"))]
    IdSpaceExhausted {
        /// The counter document key.
        key: String,
    },

    /// Data in storage is corrupted or unparseable.
    #[snafu(display("corrupted data in key '{key}': {reason}"))]
    CorruptedData {
        /// The key with corrupted data.
        key: String,
        /// Description of what went wrong.
        reason: String,
    },

    /// Underlying storage error.
    #[snafu(display("storage error: {source}"))]
    Storage {
        /// The underlying error.
        source: KeyValueStoreError,
    },

    /// JSON serialization/deserialization error.
    #[snafu(display("serialization error: {source}"))]
    Serialization {
        /// The underlying error.
        source: serde_json::Error,
    },

    /// Invalid allocator configuration.
    #[snafu(display("configuration error: {source}"))]
    Config {
        /// The underlying error.
        source: ConfigError,
    },
}

impl StableIdError {
    /// Whether this error is a lost race that a retry may resolve.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StableIdError::Conflict { .. })
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        StableIdError::InvalidArgument { reason: reason.into() }
    }
}

impl From<KeyValueStoreError> for StableIdError {
    fn from(source: KeyValueStoreError) -> Self {
        StableIdError::Storage { source }
    }
}

impl From<serde_json::Error> for StableIdError {
    fn from(source: serde_json::Error) -> Self {
        StableIdError::Serialization { source }
    }
}

impl From<ConfigError> for StableIdError {
    fn from(source: ConfigError) -> Self {
        StableIdError::Config { source }
    }
}
