//! Background acquisition task.
//!
//! The driver itself never spawns threads; a host is expected to call
//! [`AcquisitionDriver::poll_block`] on its own schedule. For hosts that
//! just want a stream of blocks, [`Acquisition::spawn`] moves the driver
//! onto a tokio task that polls continuously, forwards completed blocks
//! through a bounded channel, retries retryable failures with exponential
//! backoff, and shuts down cooperatively through a [`CancellationToken`].

use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::driver::{AcquisitionDriver, DriverState, PollOutcome};
use crate::sink::SampleBlock;

/// Consecutive retryable failures tolerated before the task gives up.
const MAX_ERRORS: u32 = 10;

/// Depth of the block channel before backpressure stalls polling.
const CHANNEL_DEPTH: usize = 8;

/// One completed block, copied out of the driver for crossing tasks.
#[derive(Debug, Clone)]
pub struct AcquiredBlock {
    /// Frame-major interleaved values.
    pub samples: Vec<f32>,
    /// Channels per frame.
    pub channel_count: usize,
    /// Frames in the block.
    pub frame_count: usize,
    /// Index of the first sample, counted from acquisition start.
    pub first_sample: u64,
    /// Block start in driver time, when the sampling rate is known.
    pub timestamp: Option<Duration>,
}

impl AcquiredBlock {
    fn copy_from(block: &SampleBlock<'_>) -> Self {
        AcquiredBlock {
            samples: block.samples().to_vec(),
            channel_count: block.channel_count(),
            frame_count: block.frame_count(),
            first_sample: block.first_sample(),
            timestamp: block.timestamp(),
        }
    }
}

/// Handles returned by [`Acquisition::spawn`].
pub struct AcquisitionChannels {
    /// Receiver for completed blocks. Closes when the task ends.
    pub blocks: mpsc::Receiver<AcquiredBlock>,
    /// Cancellation token for cooperative shutdown.
    pub cancel: CancellationToken,
}

impl AcquisitionChannels {
    /// Consume the receiver as a [`Stream`], keeping the token for shutdown.
    pub fn into_stream(self) -> (impl Stream<Item = AcquiredBlock> + 'static, CancellationToken) {
        (ReceiverStream::new(self.blocks), self.cancel)
    }
}

/// Spawns and manages the background acquisition task.
pub struct Acquisition;

impl Acquisition {
    /// Spawn the acquisition task for an initialized (or started) driver.
    ///
    /// The task starts the driver if needed, polls until cancelled or a
    /// fatal error occurs, and stops the driver on the way out. Blocks are
    /// delivered in order through the returned channel; if the receiver lags
    /// behind by more than the channel depth, polling stalls rather than
    /// dropping blocks.
    pub fn spawn(driver: AcquisitionDriver) -> AcquisitionChannels {
        let (block_tx, block_rx) = mpsc::channel(CHANNEL_DEPTH);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            Self::acquisition_task(driver, block_tx, task_cancel).await;
        });

        AcquisitionChannels { blocks: block_rx, cancel }
    }

    async fn acquisition_task(
        mut driver: AcquisitionDriver,
        block_tx: mpsc::Sender<AcquiredBlock>,
        cancel: CancellationToken,
    ) {
        info!("acquisition task started");

        if driver.state() != DriverState::Started {
            if let Err(error) = driver.start().await {
                error!("failed to start acquisition: {error}");
                return;
            }
        }

        let mut block_count = 0u64;
        let mut error_count = 0u32;

        loop {
            if cancel.is_cancelled() {
                info!("acquisition cancelled");
                break;
            }

            let mut pending: Option<AcquiredBlock> = None;
            let mut sink =
                |block: &SampleBlock<'_>| pending = Some(AcquiredBlock::copy_from(block));

            // A poll returns within the wait timeout, so cancellation is
            // observed promptly even without aborting the exchange.
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("acquisition cancelled during poll");
                    break;
                }
                result = driver.poll_block(&mut sink) => result,
            };

            match result {
                Ok(PollOutcome::Delivered) => {
                    error_count = 0;
                    block_count += 1;
                    let Some(block) = pending.take() else { continue };
                    if block_tx.send(block).await.is_err() {
                        debug!("block receiver dropped, shutting down");
                        break;
                    }
                }
                Ok(PollOutcome::Progress | PollOutcome::Timeout) => {
                    error_count = 0;
                }
                Err(error) if error.is_retryable() => {
                    error_count += 1;
                    warn!("acquisition error ({error_count}/{MAX_ERRORS}): {error}");
                    if error_count >= MAX_ERRORS {
                        error!("too many acquisition errors, shutting down");
                        break;
                    }

                    // Exponential backoff, then reconnect through the
                    // documented stop/start recovery path.
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    if let Err(restart) = Self::restart(&mut driver).await {
                        warn!("reconnect failed: {restart}");
                    }
                }
                Err(error) => {
                    error!("fatal acquisition error: {error}");
                    break;
                }
            }
        }

        if driver.state() == DriverState::Started {
            let _ = driver.stop();
        }
        info!("acquisition task ended after {block_count} blocks");
    }

    async fn restart(driver: &mut AcquisitionDriver) -> crate::Result<()> {
        driver.stop()?;
        driver.start().await
    }
}
