//! Acquisition driver lifecycle and the wait/get hot path.
//!
//! A driver moves through `Created -> Initialized -> Started <-> Stopped`
//! and back to `Created` at uninitialize. Initialization connects the
//! session, negotiates the stream header, and allocates the block buffer;
//! `start()` snapshots the server's sample total as the read baseline and
//! resets drift tracking; `poll_block()` then runs one wait/get cycle per
//! call, delivering at most one completed block and returning promptly so
//! the host keeps control of scheduling.
//!
//! The driver is single-writer: hosts must not call lifecycle methods or
//! `poll_block` concurrently on one instance. Independent instances share
//! nothing and may run in parallel.

use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::buffer::BlockBuffer;
use crate::config::AcquisitionConfig;
use crate::drift::DriftCorrector;
use crate::error::{AcquisitionError, ConnectionError, InitError, ProtocolError, Result};
use crate::protocol::{
    Command, DataRequest, DataResponse, Message, StreamHeader, WaitRequest, WaitResponse,
};
use crate::session::BufferSession;
use crate::sink::{BlockSink, SampleBlock};

/// Sampling-frequency sentinel reported to hosts when the server did not
/// announce a usable rate.
pub const SAMPLING_FREQUENCY_UNSET: f64 = -1.0;

/// Lifecycle state of an [`AcquisitionDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed; no connection, no negotiated header.
    Created,
    /// Header negotiated and buffer allocated; not yet acquiring.
    Initialized,
    /// Acquiring; `poll_block` may be called.
    Started,
    /// Acquisition paused; the session stays connected for the next start.
    Stopped,
}

/// Outcome of one `poll_block` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A completed block was handed to the sink.
    Delivered,
    /// Fresh samples were copied but the block is not complete yet.
    Progress,
    /// The wait elapsed with no fresh samples. Not an error.
    Timeout,
}

/// Streaming acquisition driver for one buffer server.
pub struct AcquisitionDriver {
    config: AcquisitionConfig,
    session: BufferSession,
    state: DriverState,
    header: Option<StreamHeader>,
    buffer: Option<BlockBuffer>,
    drift: DriftCorrector,
    /// Decode scratch, allocated once at initialize and reused per fetch.
    scratch: Vec<f32>,
    /// Absolute server index one past the last fetched sample.
    known_total: u64,
    /// Server total snapshotted at start; samples before it are never read.
    baseline: u64,
    /// Absolute server index of the first sample in the block being filled.
    block_start: u64,
    started_at: Option<Instant>,
}

impl AcquisitionDriver {
    /// Create a driver for the given configuration.
    pub fn new(config: AcquisitionConfig) -> Result<Self> {
        config.validate().map_err(AcquisitionError::from)?;

        let session = BufferSession::new(&config.host, config.port, config.connect_timeout);
        let drift = DriftCorrector::new(config.samples_per_block, None);

        Ok(AcquisitionDriver {
            config,
            session,
            state: DriverState::Created,
            header: None,
            buffer: None,
            drift,
            scratch: Vec::new(),
            known_total: 0,
            baseline: 0,
            block_start: 0,
            started_at: None,
        })
    }

    /// Replace the configuration. Only allowed before a connection exists.
    pub fn configure(&mut self, config: AcquisitionConfig) -> Result<()> {
        if self.state != DriverState::Created {
            return Err(AcquisitionError::invalid_state("configure", self.state));
        }
        if self.session.is_connected() {
            return Err(ConnectionError::AlreadyConnected {
                host: self.session.host().to_string(),
                port: self.session.port(),
            }
            .into());
        }

        config.validate().map_err(AcquisitionError::from)?;
        self.session = BufferSession::new(&config.host, config.port, config.connect_timeout);
        self.config = config;
        Ok(())
    }

    /// Connect, negotiate the stream header, and allocate the block buffer.
    ///
    /// `samples_per_block` is the size of every delivered block. On failure
    /// the session is torn down and the driver stays `Created`.
    pub async fn initialize(&mut self, samples_per_block: u32) -> Result<()> {
        if self.state != DriverState::Created {
            return Err(AcquisitionError::invalid_state("initialize", self.state));
        }
        if samples_per_block == 0 {
            return Err(InitError::invalid_config("samples_per_block must be nonzero").into());
        }
        self.config.samples_per_block = samples_per_block;

        self.session.connect().await.map_err(|source| InitError::Connect { source })?;

        let header = match self.request_header().await {
            Ok(header) => header,
            Err(error) => {
                self.session.disconnect().await;
                return Err(InitError::Negotiation { source: Box::new(error) }.into());
            }
        };

        let buffer = match BlockBuffer::new(samples_per_block, header.channel_count()) {
            Ok(buffer) => buffer,
            Err(source) => {
                self.session.disconnect().await;
                return Err(InitError::Buffer { source }.into());
            }
        };

        info!(
            channels = header.channel_count(),
            names_found = header.found_channel_names(),
            sampling_frequency = header.sampling_frequency().unwrap_or(SAMPLING_FREQUENCY_UNSET),
            samples_per_block,
            "stream header negotiated"
        );

        self.scratch = Vec::with_capacity(buffer.capacity());
        self.drift = DriftCorrector::new(samples_per_block, header.sampling_frequency());
        self.header = Some(header);
        self.buffer = Some(buffer);
        self.state = DriverState::Initialized;
        Ok(())
    }

    /// Begin (or resume) acquisition.
    ///
    /// Re-establishes the session if it went away, snapshots the server's
    /// current sample total as the read baseline, and resets drift tracking.
    pub async fn start(&mut self) -> Result<()> {
        if !matches!(self.state, DriverState::Initialized | DriverState::Stopped) {
            return Err(AcquisitionError::invalid_state("start", self.state));
        }

        if !self.session.is_connected() {
            debug!("session not live, reconnecting");
            self.session.connect().await.map_err(AcquisitionError::from)?;
        }

        // A zero-timeout wait doubles as the liveness probe and returns the
        // server's current totals without blocking.
        let probe = WaitRequest {
            threshold_samples: 0,
            threshold_events: u32::MAX,
            timeout: Duration::ZERO,
        };
        let response = self.wait_data(&probe).await?;

        self.known_total = u64::from(response.sample_count);
        self.baseline = self.known_total;
        self.block_start = self.known_total;
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.reset();
        }
        self.drift.start();
        self.started_at = Some(Instant::now());
        self.state = DriverState::Started;

        info!(baseline = self.baseline, "acquisition started");
        Ok(())
    }

    /// Pause acquisition. The connection stays up so repeated start/stop
    /// cycles reuse one session.
    pub fn stop(&mut self) -> Result<()> {
        if !matches!(self.state, DriverState::Started | DriverState::Stopped) {
            return Err(AcquisitionError::invalid_state("stop", self.state));
        }

        self.drift.stop();
        self.state = DriverState::Stopped;
        info!(delivered = self.drift.delivered(), "acquisition stopped");
        Ok(())
    }

    /// Run one wait/get cycle, delivering at most one completed block.
    ///
    /// A wait that elapses with no fresh samples returns
    /// [`PollOutcome::Timeout`] without invoking the sink. Any protocol or
    /// connection failure is surfaced as this call's error; the driver stays
    /// `Started` and never retries on its own.
    pub async fn poll_block<S>(&mut self, sink: &mut S) -> Result<PollOutcome>
    where
        S: BlockSink + ?Sized,
    {
        if self.state != DriverState::Started {
            return Err(AcquisitionError::invalid_state("poll_block", self.state));
        }
        let Some(started_at) = self.started_at else {
            return Err(AcquisitionError::invalid_state("poll_block", self.state));
        };
        let sampling_hz = self.header.as_ref().and_then(StreamHeader::sampling_frequency);
        let (channel_count, remaining_frames) = match self.buffer.as_ref() {
            Some(buffer) => (buffer.channel_count(), buffer.remaining_frames()),
            None => return Err(AcquisitionError::invalid_state("poll_block", self.state)),
        };

        // 1. The drift corrector owns the threshold; the loop never
        //    recomputes it.
        let wanted = self.drift.threshold(started_at.elapsed());

        // 2. Wait until `wanted` fresh samples exist past the known total.
        let absolute = self
            .known_total
            .saturating_add(u64::from(wanted))
            .saturating_sub(1)
            .min(u64::from(u32::MAX)) as u32;
        let wait = WaitRequest {
            threshold_samples: absolute,
            threshold_events: u32::MAX,
            timeout: self.config.wait_timeout,
        };
        let response = self.wait_data(&wait).await?;

        // 3. Nothing new: a normal outcome, not an error.
        let server_total = u64::from(response.sample_count);
        if server_total <= self.known_total {
            trace!(server_total, known = self.known_total, "wait elapsed with no fresh samples");
            return Ok(PollOutcome::Timeout);
        }

        // 4. Fetch the fresh range, capped to what the current block still
        //    accepts.
        let available = server_total - self.known_total;
        let want = available.min(remaining_frames as u64);
        let begin = self.known_total;
        let end = begin + want - 1;
        let request = DataRequest { begin_sample: begin as u32, end_sample: end as u32 };

        let message = Message::with_payload(Command::GetData, request.to_payload());
        let reply = self.session.exchange(&message, self.config.connect_timeout).await?;
        let payload = expect_response(&reply, Command::GetOk, Command::GetErr)?;

        let data = DataResponse::from_payload(payload)?;
        if u64::from(data.frame_count) != want || data.channel_count as usize != channel_count {
            return Err(ProtocolError::malformed(
                "get-data response",
                format!(
                    "requested {} frames x {} channels, got {} x {}",
                    want, channel_count, data.frame_count, data.channel_count
                ),
            )
            .into());
        }

        // 5. Decode and append to the block in one pass.
        self.scratch.clear();
        data.decode_into(&mut self.scratch);

        // 6. Account the delivery before deciding on completion.
        self.known_total = end + 1;
        self.drift.record_delivery(want);

        let Some(buffer) = self.buffer.as_mut() else {
            return Err(AcquisitionError::invalid_state("poll_block", self.state));
        };
        buffer.write_frames(&self.scratch);

        // 7. Hand a completed block to the sink and rewind the cursor.
        if buffer.is_full() {
            let first_sample = self.block_start - self.baseline;
            let timestamp =
                sampling_hz.map(|hz| Duration::from_secs_f64(first_sample as f64 / hz));

            let block = SampleBlock::new(
                buffer.as_slice(),
                channel_count,
                buffer.frames_per_block(),
                first_sample,
                timestamp,
            );
            sink.deliver(&block);

            buffer.reset();
            self.block_start = self.known_total;
            trace!(first_sample, "block delivered");
            return Ok(PollOutcome::Delivered);
        }

        Ok(PollOutcome::Progress)
    }

    /// Release the block buffer and disconnect the session. Idempotent; safe
    /// on a driver that was never initialized.
    pub async fn uninitialize(&mut self) -> Result<()> {
        self.session.disconnect().await;
        self.header = None;
        self.buffer = None;
        self.scratch = Vec::new();
        self.drift = DriftCorrector::new(self.config.samples_per_block, None);
        self.started_at = None;
        self.known_total = 0;
        self.baseline = 0;
        self.block_start = 0;

        if self.state != DriverState::Created {
            debug!("driver uninitialized");
        }
        self.state = DriverState::Created;
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// The negotiated stream header, if initialized.
    pub fn header(&self) -> Option<&StreamHeader> {
        self.header.as_ref()
    }

    /// Whether the server supplied channel names during negotiation.
    pub fn found_channel_names(&self) -> bool {
        self.header.as_ref().is_some_and(StreamHeader::found_channel_names)
    }

    /// Name of channel `index`. Out-of-range indices (and drivers without a
    /// negotiated header) yield an empty string, never an error.
    pub fn channel_name(&self, index: u32) -> &str {
        self.header.as_ref().map(|header| header.channel_name(index)).unwrap_or("")
    }

    /// Nominal sampling frequency in Hz, or
    /// [`SAMPLING_FREQUENCY_UNSET`] (-1.0) when the server did not report a
    /// usable rate.
    pub fn sampling_frequency(&self) -> f64 {
        self.header
            .as_ref()
            .and_then(StreamHeader::sampling_frequency)
            .unwrap_or(SAMPLING_FREQUENCY_UNSET)
    }

    /// Samples delivered since the last start.
    pub fn samples_delivered(&self) -> u64 {
        self.drift.delivered()
    }

    /// Capacity of the block buffer in values
    /// (`samples_per_block x channel_count`), or zero before initialize.
    pub fn block_capacity(&self) -> usize {
        self.buffer.as_ref().map(BlockBuffer::capacity).unwrap_or(0)
    }

    /// The active configuration.
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Issue a GET-HEADER request and parse the stream metadata.
    async fn request_header(&mut self) -> Result<StreamHeader> {
        let reply = self
            .session
            .exchange(&Message::bare(Command::GetHeader), self.config.connect_timeout)
            .await?;
        let payload = expect_response(&reply, Command::GetOk, Command::GetErr)?;
        let header = StreamHeader::from_payload(payload)?;

        if !header.found_channel_names() {
            warn!("server did not supply channel names");
        }
        if header.sampling_frequency().is_none() {
            warn!("server did not report a usable sampling frequency, drift correction disabled");
        }
        Ok(header)
    }

    /// Issue a WAIT-DATA request and parse the server totals.
    async fn wait_data(&mut self, request: &WaitRequest) -> Result<WaitResponse> {
        // The server holds the request up to the wait timeout before
        // answering, so the transport bound must exceed it.
        let reply_timeout = request.timeout + self.config.connect_timeout;

        let message = Message::with_payload(Command::WaitData, request.to_payload());
        let reply = self.session.exchange(&message, reply_timeout).await?;
        let payload = expect_response(&reply, Command::WaitOk, Command::WaitErr)?;
        Ok(WaitResponse::from_payload(payload)?)
    }
}

/// Match a reply against the expected success command, mapping the paired
/// error command to [`ProtocolError::Rejected`].
fn expect_response<'m>(
    reply: &'m Message,
    ok: Command,
    err: Command,
) -> Result<&'m [u8], ProtocolError> {
    if reply.command == ok {
        Ok(&reply.payload)
    } else if reply.command == err {
        Err(ProtocolError::Rejected { command: err.code() })
    } else {
        Err(ProtocolError::malformed(
            "response command",
            format!("expected {:?}, got {:?}", ok, reply.command),
        ))
    }
}
