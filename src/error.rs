//! Error types for the rtemp-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// A connect attempt is still waiting for the link to come up.
    #[error("Connection attempt already in progress")]
    ConnectionInProgress,

    /// Operation requires a connection but no sensor is connected.
    #[error("Sensor not connected")]
    NotConnected,

    /// Invalid data was received from the sensor.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// The last-device store could not be read or written.
    #[error("Storage error: {context}")]
    Storage {
        /// Description of the storage failure.
        context: String,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session task has stopped and can no longer accept commands.
    #[error("Session closed")]
    SessionClosed,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidData`] with the given context.
    pub(crate) fn invalid_data(context: impl Into<String>) -> Self {
        Self::InvalidData {
            context: context.into(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
