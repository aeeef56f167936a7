//! Error types for printer connectivity.

use thiserror::Error;

/// Errors from printer connectivity operations.
///
/// Protocol-level decode failures on the telemetry stream are absorbed by
/// the device link (logged and dropped); every other category surfaces to
/// the caller as a distinct kind so the orchestration layer can present
/// differentiated messages.
#[derive(Error, Debug)]
pub enum BambuError {
    /// Printer address, access code, or serial is missing. Raised before
    /// any network attempt is made.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A local file referenced by a submission does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// TCP/TLS/MQTT connection failure.
    #[error("connection failed: {0}")]
    Connectivity(String),

    /// File transfer to the printer failed.
    #[error("file transfer failed: {0}")]
    Transfer(String),

    /// Malformed message on the control channel.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A connection deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for printer connectivity operations.
pub type Result<T> = std::result::Result<T, BambuError>;
