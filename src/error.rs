//! Error types for the bridge.

use thiserror::Error;

/// Common error type for the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Remote connection error (dial failure, timeout, closed socket).
    #[error("connection error: {0}")]
    Connection(String),

    /// SSH transport or authentication error.
    #[error("SSH error: {0}")]
    Ssh(String),

    /// Connection request rejected by the endpoint allow-list.
    #[error("{0}")]
    Unauthorized(String),

    /// Binary file transfer error.
    #[error("transfer error: {0}")]
    Transfer(#[from] crate::zmodem::TransferError),

    /// Malformed message from the browser.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),
}

impl From<russh::Error> for BridgeError {
    fn from(e: russh::Error) -> Self {
        BridgeError::Ssh(e.to_string())
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_error_display() {
        let err =
            BridgeError::Unauthorized("Connection blocked: Host not in approved list".to_string());
        assert_eq!(
            err.to_string(),
            "Connection blocked: Host not in approved list"
        );
    }

    #[test]
    fn test_connection_error_display() {
        let err = BridgeError::Connection("connection refused".to_string());
        assert_eq!(err.to_string(), "connection error: connection refused");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = BridgeError::NotFound("endpoint".to_string());
        assert_eq!(err.to_string(), "endpoint not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BridgeError = io_err.into();
        assert!(matches!(err, BridgeError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_transfer_error_conversion() {
        let err: BridgeError = crate::zmodem::TransferError::Spawn("no such file".to_string()).into();
        assert!(matches!(err, BridgeError::Transfer(_)));
        assert!(err.to_string().starts_with("transfer error:"));
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(BridgeError::Config("test".to_string()))
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
