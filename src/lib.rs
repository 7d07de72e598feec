//! Type-safe Rust client driver for FieldTrip-style real-time data buffer
//! servers.
//!
//! `fieldbuf` connects to a buffer server over its binary request/response
//! protocol, negotiates the stream metadata (channel count, channel names,
//! nominal sampling frequency), and then polls for freshly arrived samples,
//! assembling them into fixed-size, correctly timestamped blocks. A drift
//! corrector keeps long acquisitions synchronized with the wall clock even
//! when the source's true sampling rate differs slightly from the nominal
//! rate the server announces.
//!
//! # Features
//!
//! - **Bounded waits**: every protocol exchange and every poll returns
//!   within a configured timeout; "no data yet" is an outcome, not an error
//! - **One allocation**: the block buffer is sized once at initialize and
//!   reused for every block
//! - **Drift correction**: bounded threshold adjustments instead of silently
//!   accumulating lag or skew
//! - **Host control**: poll from your own loop, or let
//!   [`Acquisition::spawn`] stream blocks from a background task
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fieldbuf::{AcquisitionConfig, Fieldbuf, PollOutcome, SampleBlock};
//!
//! #[tokio::main]
//! async fn main() -> fieldbuf::Result<()> {
//!     let config = AcquisitionConfig {
//!         host: "localhost".into(),
//!         samples_per_block: 128,
//!         ..AcquisitionConfig::default()
//!     };
//!
//!     let mut driver = Fieldbuf::connect(config).await?;
//!     println!(
//!         "{} channels at {} Hz",
//!         driver.header().map(|h| h.channel_count()).unwrap_or(0),
//!         driver.sampling_frequency(),
//!     );
//!
//!     driver.start().await?;
//!     let mut sink = |block: &SampleBlock<'_>| {
//!         println!("block of {} frames", block.frame_count());
//!     };
//!     loop {
//!         if driver.poll_block(&mut sink).await? == PollOutcome::Delivered {
//!             break;
//!         }
//!     }
//!     driver.stop()?;
//!     driver.uninitialize().await
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod drift;
mod error;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod sink;

pub mod driver;

#[cfg(test)]
pub mod test_utils;

// Core exports
pub use config::AcquisitionConfig;
pub use driver::{AcquisitionDriver, DriverState, PollOutcome, SAMPLING_FREQUENCY_UNSET};
pub use error::{
    AcquisitionError, ConnectionError, InitError, ProtocolError, ResourceError, Result,
};
pub use protocol::StreamHeader;
pub use runner::{AcquiredBlock, Acquisition, AcquisitionChannels};
pub use session::BufferSession;
pub use sink::{BlockSink, SampleBlock};

/// Unified entry point for buffer-server acquisition.
///
/// The factory builds a driver from a configuration and runs initialization
/// (connect, header negotiation, buffer allocation) in one step, returning a
/// driver that is ready for [`AcquisitionDriver::start`].
///
/// # Example
///
/// ```rust,no_run
/// use fieldbuf::{AcquisitionConfig, Fieldbuf};
///
/// #[tokio::main]
/// async fn main() -> fieldbuf::Result<()> {
///     let driver = Fieldbuf::connect(AcquisitionConfig::default()).await?;
///     println!("negotiated {} channels", driver.header().map(|h| h.channel_count()).unwrap_or(0));
///     Ok(())
/// }
/// ```
pub struct Fieldbuf;

impl Fieldbuf {
    /// Connect to a buffer server and negotiate the stream.
    ///
    /// Uses `config.samples_per_block` as the delivery block size.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - The server cannot be reached within the connect timeout
    /// - Header negotiation fails or the buffer cannot be allocated
    pub async fn connect(config: AcquisitionConfig) -> Result<AcquisitionDriver> {
        let samples_per_block = config.samples_per_block;
        let mut driver = AcquisitionDriver::new(config)?;
        driver.initialize(samples_per_block).await?;
        Ok(driver)
    }
}
