//! Acquisition configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::InitError;

/// Conventional listening port of buffer servers.
pub const DEFAULT_PORT: u16 = 1972;

/// Everything a host supplies before `start()`: the server identity, the
/// delivery block size, and the timeout budget.
///
/// Serde derives let hosts load this from whatever configuration format they
/// already use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Buffer server host name or address.
    pub host: String,

    /// Buffer server TCP port.
    pub port: u16,

    /// Samples per delivered block. Also the base wait threshold before
    /// drift correction.
    pub samples_per_block: u32,

    /// Bound on establishing the TCP connection. Also bounds the metadata
    /// round-trips (header negotiation, data fetch) on an established
    /// session.
    pub connect_timeout: Duration,

    /// Server-side bound on one wait-for-data request. A wait that elapses
    /// with no fresh samples is a normal outcome, not an error.
    pub wait_timeout: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        AcquisitionConfig {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            samples_per_block: 32,
            connect_timeout: Duration::from_secs(5),
            wait_timeout: Duration::from_millis(500),
        }
    }
}

impl AcquisitionConfig {
    /// Validate the configuration before it is put to use.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.host.is_empty() {
            return Err(InitError::invalid_config("host must not be empty"));
        }
        if self.port == 0 {
            return Err(InitError::invalid_config("port must be nonzero"));
        }
        if self.samples_per_block == 0 {
            return Err(InitError::invalid_config("samples_per_block must be nonzero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(InitError::invalid_config("connect_timeout must be nonzero"));
        }
        if self.wait_timeout.is_zero() {
            return Err(InitError::invalid_config("wait_timeout must be nonzero"));
        }
        Ok(())
    }
}
