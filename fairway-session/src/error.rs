use thiserror::Error;

use crate::ble::{AdapterError, PowerState};
use crate::location::LocationError;
use crate::storage::StoreError;

/// Conditions the coordinator surfaces to the presentation layer.
///
/// None of these are fatal: the coordinator keeps running and records the
/// most recent one as its status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The user refused location or bluetooth access.
    #[error("permission denied")]
    PermissionDenied,
    #[error("location source unavailable: {0}")]
    LocationUnavailable(String),
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("connection to device {0} failed")]
    ConnectionFailed(String),
    #[error("storage failure, try again: {0}")]
    Persistence(String),
    #[error("a round is already active")]
    RoundAlreadyActive,
    #[error("invalid score: {0}")]
    InvalidScore(String),
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RoundAlreadyActive => Self::RoundAlreadyActive,
            other => Self::Persistence(other.to_string()),
        }
    }
}

impl From<LocationError> for SessionError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::PermissionDenied => Self::PermissionDenied,
            other => Self::LocationUnavailable(other.to_string()),
        }
    }
}

impl From<AdapterError> for SessionError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Unavailable(PowerState::Unauthorized) => Self::PermissionDenied,
            AdapterError::ConnectionFailed { id, .. } => Self::ConnectionFailed(id.to_string()),
            other => Self::AdapterUnavailable(other.to_string()),
        }
    }
}
