//! Error types for the gateway core

use std::time::Duration;

use bsb_protocol::{EncodeError, ValidateError};
use thiserror::Error;

/// Failures of the serial transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Write did not complete within the write timeout; unsent output was discarded
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// I/O error on the device
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport task is no longer running
    #[error("transport closed")]
    Closed,

    /// The serial port could not be opened
    #[error("cannot open {port}: {source}")]
    Open {
        /// Port name
        port: String,
        /// Serial backend error
        #[source]
        source: tokio_serial::Error,
    },

    /// Port setting not supported by the serial backend
    #[error("unsupported port setting: {0}")]
    Unsupported(&'static str),
}

/// Failures while originating a bus transaction
#[derive(Debug, Error)]
pub enum BusError {
    /// Field or value rejected before transmission
    #[error("validation failed: {0}")]
    Validation(#[from] ValidateError),

    /// Value cannot be represented on the wire
    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodeError),

    /// Transmission failed
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome failures delivered to a remote caller
#[derive(Debug, Error)]
pub enum RequestError {
    /// The request could not be sent
    #[error(transparent)]
    Bus(#[from] BusError),

    /// No matching reply arrived within the bus-level window
    #[error("no response from BSB device within {0:?}")]
    Timeout(Duration),

    /// Caller-side wait elapsed before any outcome arrived
    #[error("gave up waiting for an outcome after {0:?}")]
    NoResponse(Duration),

    /// The gateway dropped the request without an outcome
    #[error("request abandoned by the gateway")]
    Abandoned,
}

/// Failure while handling one event
///
/// Never fatal: the hub logs it and carries on with the next event.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A trace logger asked for a value that could not be requested
    #[error("logger request for field {field} failed: {source}")]
    LoggerRequest {
        /// Field the logger traces
        field: u32,
        /// Underlying failure
        #[source]
        source: BusError,
    },

    /// A local command failed and there is no monitor to report it to
    #[error("command {command:?} failed: {source}")]
    LocalCommand {
        /// Command as issued
        command: String,
        /// Underlying failure
        #[source]
        source: BusError,
    },

    /// The handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for the expected shape
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is outside its allowed range
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Config key
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}
