use thiserror::Error;

/// Errors returned by a [`KeyValueStore`](crate::KeyValueStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyValueStoreError {
    #[error("key '{key}' not found")]
    NotFound { key: String },
    #[error("operation failed: {reason}")]
    Failed { reason: String },
    #[error("key size {size} exceeds maximum of {max} bytes")]
    KeyTooLarge { size: usize, max: u32 },
    #[error("value size {size} exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: u32 },
    /// The conditional write lost: the stored value no longer matches `expected`.
    #[error("compare-and-swap failed for key '{key}': expected {expected:?}, found {actual:?}")]
    CompareAndSwapFailed {
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },
}

impl KeyValueStoreError {
    /// Whether this error is a lost compare-and-swap race.
    pub fn is_cas_conflict(&self) -> bool {
        matches!(self, KeyValueStoreError::CompareAndSwapFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = KeyValueStoreError::NotFound {
            key: "my-key".to_string(),
        };
        assert_eq!(err.to_string(), "key 'my-key' not found");
    }

    #[test]
    fn cas_failed_display() {
        let err = KeyValueStoreError::CompareAndSwapFailed {
            key: "k".to_string(),
            expected: None,
            actual: Some("v".to_string()),
        };
        assert_eq!(err.to_string(), "compare-and-swap failed for key 'k': expected None, found Some(\"v\")");
        assert!(err.is_cas_conflict());
    }

    #[test]
    fn other_errors_are_not_conflicts() {
        let err = KeyValueStoreError::Failed {
            reason: "disk full".to_string(),
        };
        assert!(!err.is_cas_conflict());
        assert_eq!(err.to_string(), "operation failed: disk full");
    }
}
