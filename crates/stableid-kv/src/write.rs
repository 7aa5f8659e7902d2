//! Write operation types for modifying document state.

use serde::Deserialize;
use serde::Serialize;

/// Commands for modifying key-value state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteCommand {
    /// Set a single key-value pair unconditionally.
    Set { key: String, value: String },
    /// Delete a single key.
    Delete { key: String },
    /// Compare-and-swap: atomically update value if current value matches expected.
    ///
    /// `expected: None` succeeds only when the key does not exist yet.
    CompareAndSwap {
        key: String,
        expected: Option<String>,
        new_value: String,
    },
}

impl WriteCommand {
    /// The key this command mutates.
    pub fn key(&self) -> &str {
        match self {
            WriteCommand::Set { key, .. } | WriteCommand::Delete { key } | WriteCommand::CompareAndSwap { key, .. } => {
                key
            }
        }
    }

    /// The value this command writes, if any.
    pub fn value(&self) -> Option<&str> {
        match self {
            WriteCommand::Set { value, .. } => Some(value),
            WriteCommand::CompareAndSwap { new_value, .. } => Some(new_value),
            WriteCommand::Delete { .. } => None,
        }
    }
}

/// Request to write to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteRequest {
    pub command: WriteCommand,
}

impl WriteRequest {
    /// Create a Set command.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Set {
                key: key.into(),
                value: value.into(),
            },
        }
    }

    /// Create a Delete command.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::Delete { key: key.into() },
        }
    }

    /// Create a CompareAndSwap command.
    pub fn compare_and_swap(key: impl Into<String>, expected: Option<String>, new_value: impl Into<String>) -> Self {
        Self {
            command: WriteCommand::CompareAndSwap {
                key: key.into(),
                expected,
                new_value: new_value.into(),
            },
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteResult {
    /// The command that was applied.
    pub command: WriteCommand,
    /// Store revision assigned to this write.
    pub revision: u64,
}
