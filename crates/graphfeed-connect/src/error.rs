//! Error types for graphfeed-connect
//!
//! Only configuration errors are fatal. Everything else is reported, logged
//! and survived by the long-running loops.

use graphfeed_bundle::BundleError;
use std::fmt;
use thiserror::Error;

/// Result type alias for the connector runtime
pub type Result<T> = std::result::Result<T, ConnectError>;

/// Main error type for the connector runtime
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bundle could not be read or partitioned
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// Broker kept rejecting a message and the retry policy gave up
    #[error("Message unroutable after {attempts} attempt(s): {message}")]
    PublishUnroutable { message: String, attempts: u32 },

    /// Non-retryable publish failure
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Broker connection dropped
    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),

    /// Control API unreachable during heartbeat
    #[error("Heartbeat failure: {0}")]
    HeartbeatFailure(String),

    /// Control API call failed
    #[error("Control API error: {0}")]
    ControlApi(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ConnectError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection lost error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionLost(msg.into())
    }

    /// Create a control API error
    pub fn control(msg: impl Into<String>) -> Self {
        Self::ControlApi(msg.into())
    }
}

impl From<serde_json::Error> for ConnectError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Connector status for health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    /// Starting up
    Starting,
    /// Running normally
    Running,
    /// Temporarily unhealthy (reconnecting)
    Unhealthy,
    /// Stopped
    Stopped,
    /// Failed permanently
    Failed,
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectError::PublishUnroutable {
            message: "NO_ROUTE".to_string(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "Message unroutable after 3 attempt(s): NO_ROUTE"
        );
    }

    #[test]
    fn test_bundle_error_is_transparent() {
        let err: ConnectError = BundleError::EmptyBundle.into();
        assert_eq!(err.to_string(), BundleError::EmptyBundle.to_string());
    }

    #[test]
    fn test_helper_constructors() {
        assert!(matches!(
            ConnectError::connection("reset"),
            ConnectError::ConnectionLost(_)
        ));
        assert_eq!(
            ConnectError::control("502").to_string(),
            "Control API error: 502"
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectorStatus::Running.to_string(), "running");
        assert_eq!(ConnectorStatus::Unhealthy.to_string(), "unhealthy");
    }
}
