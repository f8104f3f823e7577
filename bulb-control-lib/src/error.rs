use std::io;

use thiserror::Error;

/// Errors produced by discovery and device control.
///
/// Only [`ControlError::Bind`] is fatal. The other kinds are logged by the
/// component that hit them and turned into events, so a caller mostly sees
/// them in log output rather than as return values.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The discovery socket could not be bound. The caller has to restart.
    #[error("Failed to bind discovery socket on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// A discovery packet could not be split into header lines.
    #[error("Malformed discovery message: {0}")]
    MalformedMessage(String),

    /// Connection level failure on a device socket.
    #[error("Transport error for device {device_id}: {source}")]
    Transport {
        device_id: String,
        #[source]
        source: io::Error,
    },

    /// `discover()` was called before `start()`.
    #[error("Discovery has not been started")]
    NotStarted,

    /// A command was issued for a device without an open connection.
    #[error("Device {0} is not connected")]
    NotConnected(String),

    /// The advertised `Location` header is missing or not `scheme://host:port`.
    #[error("Invalid device location: {0}")]
    InvalidLocation(String),

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ControlError>;
