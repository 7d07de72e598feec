//! Error types for buffer-server acquisition.
//!
//! The taxonomy is layered: each failure domain has its own enum, and
//! [`AcquisitionError`] unifies them for callers that only care about the
//! top level.
//!
//! - **[`ConnectionError`]**: transport-level failures. Fatal to the current
//!   session but recoverable by reconnecting via `stop()`/`start()`.
//! - **[`ProtocolError`]**: the peer sent something this client does not
//!   understand, or rejected a request. Never retried automatically.
//! - **[`InitError`]**: initialization failed (bad configuration, connect or
//!   header negotiation failure, buffer allocation). Fatal to `initialize`.
//! - **[`ResourceError`]**: invalid buffer sizing. Caller error.
//!
//! Timeouts waiting for new samples are deliberately *not* errors; they are
//! the normal "no data yet" outcome and are reported through
//! [`PollOutcome::Timeout`](crate::driver::PollOutcome).
//!
//! ## Recovery
//!
//! ```rust
//! use fieldbuf::{AcquisitionError, ConnectionError};
//!
//! let error = AcquisitionError::from(ConnectionError::Closed);
//! if error.is_retryable() {
//!     // stop()/start() re-establishes the session
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::driver::DriverState;

/// Result type alias for acquisition operations.
pub type Result<T, E = AcquisitionError> = std::result::Result<T, E>;

/// Transport-level failures on the buffer-server session.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("connection to {host}:{port} refused")]
    Refused {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("connection closed by peer")]
    Closed,

    #[error("already connected to {host}:{port}")]
    AlreadyConnected { host: String, port: u16 },
}

/// Peer/protocol mismatches. Always fatal, never retried automatically.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("malformed {context}: {details}")]
    Malformed { context: &'static str, details: String },

    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedVersion { expected: u16, found: u16 },

    #[error("server rejected request {command:#06x}")]
    Rejected { command: u16 },
}

impl ProtocolError {
    /// Helper constructor for malformed-message errors.
    pub fn malformed(context: &'static str, details: impl Into<String>) -> Self {
        ProtocolError::Malformed { context, details: details.into() }
    }
}

/// Initialization failures. The driver remains in the `Created` state.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum InitError {
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to connect to the buffer server")]
    Connect {
        #[source]
        source: ConnectionError,
    },

    #[error("header negotiation failed")]
    Negotiation {
        #[source]
        source: Box<AcquisitionError>,
    },

    #[error("sample buffer allocation failed")]
    Buffer {
        #[source]
        source: ResourceError,
    },
}

impl InitError {
    /// Helper constructor for configuration errors.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        InitError::InvalidConfig { reason: reason.into() }
    }
}

/// Invalid resource sizing. Fatal, caller error.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ResourceError {
    #[error("invalid block size: {samples_per_block} samples x {channel_count} channels")]
    InvalidSize { samples_per_block: u32, channel_count: u32 },
}

/// Top-level error type for acquisition operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AcquisitionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("{operation} is not valid while the driver is {state:?}")]
    InvalidState { operation: &'static str, state: DriverState },
}

impl AcquisitionError {
    /// Helper constructor for lifecycle misuse.
    pub fn invalid_state(operation: &'static str, state: DriverState) -> Self {
        AcquisitionError::InvalidState { operation, state }
    }

    /// Returns whether this error is potentially recoverable by tearing the
    /// session down and reconnecting (`stop()` followed by `start()`).
    pub fn is_retryable(&self) -> bool {
        match self {
            AcquisitionError::Connection { .. } => true,
            AcquisitionError::Protocol { .. } => false,
            AcquisitionError::Init { .. } => false,
            AcquisitionError::Resource { .. } => false,
            AcquisitionError::InvalidState { .. } => false,
        }
    }
}
