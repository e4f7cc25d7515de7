//! Store error types

use thiserror::Error;

/// Errors that can occur in the store or broker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Requested key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store or broker is unreachable or closed
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<crate::device::DeviceError> for StoreError {
    fn from(err: crate::device::DeviceError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::NotFound("config for AA:BB".to_string());
        assert_eq!(err.to_string(), "Not found: config for AA:BB");

        let err = StoreError::Unavailable("store is closed".to_string());
        assert_eq!(err.to_string(), "Store unavailable: store is closed");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
