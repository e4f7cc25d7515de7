//! Hub error types

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::device::DeviceError;
use crate::store::StoreError;

/// Errors surfaced by hub operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Device, configuration or identity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Payload or identity failed structural decoding
    #[error("Bad payload: {0}")]
    BadPayload(String),

    /// Store or broker unreachable, or a capacity limit was hit
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Writing to a live connection failed
    #[error("Write failed: {0}")]
    WriteFailed(String),
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => HubError::NotFound(msg),
            StoreError::Unavailable(msg) => HubError::Unavailable(msg),
            StoreError::Serialization(msg) => HubError::BadPayload(msg),
        }
    }
}

impl From<DeviceError> for HubError {
    fn from(err: DeviceError) -> Self {
        HubError::BadPayload(err.to_string())
    }
}

impl From<ConnectionError> for HubError {
    fn from(err: ConnectionError) -> Self {
        HubError::WriteFailed(err.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::BadPayload(err.to_string())
    }
}

/// Result type alias for hub operations
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_one_to_one() {
        assert_eq!(
            HubError::from(StoreError::NotFound("x".into())),
            HubError::NotFound("x".into())
        );
        assert_eq!(
            HubError::from(StoreError::Unavailable("x".into())),
            HubError::Unavailable("x".into())
        );
        assert_eq!(
            HubError::from(StoreError::Serialization("x".into())),
            HubError::BadPayload("x".into())
        );
    }

    #[test]
    fn test_connection_errors_are_write_failures() {
        let err: HubError = ConnectionError::Closed.into();
        assert!(matches!(err, HubError::WriteFailed(_)));
    }
}
