//! Stream metadata negotiated from the server's GET-HEADER response.
//!
//! The response payload is a fixed 24-byte definition followed by optional
//! tagged chunks:
//!
//! ```text
//! u32  channel count
//! u32  sample count currently buffered
//! u32  event count currently buffered
//! f32  nominal sampling frequency in Hz
//! u32  sample data type code
//! u32  total size of the trailing chunks, in bytes
//! [chunks: u32 type, u32 size, data]
//! ```
//!
//! Chunk type 1 carries the channel names as NUL-terminated strings, one per
//! channel. Servers are free to omit it; the driver then reports that names
//! were not found and [`StreamHeader::channel_name`] returns an empty string.

use serde::Serialize;

use crate::error::ProtocolError;

/// Chunk type carrying NUL-terminated channel names.
pub const CHUNK_CHANNEL_NAMES: u32 = 1;

/// Size of the fixed header definition, in bytes.
pub const HEADER_DEF_SIZE: usize = 24;

/// Stream metadata negotiated once at initialization, immutable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct StreamHeader {
    channel_count: u32,
    channel_names: Option<Vec<String>>,
    sampling_frequency: Option<f64>,
    sample_count: u32,
    event_count: u32,
    data_type: u32,
}

impl StreamHeader {
    /// Parse a GET-HEADER response payload.
    ///
    /// A sampling frequency reported as zero, negative, or non-finite is
    /// treated as unset rather than an error; the same applies to a missing
    /// or inconsistent channel-name chunk. Structural problems (short
    /// payload, chunk sizes past the end) are [`ProtocolError::Malformed`].
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < HEADER_DEF_SIZE {
            return Err(ProtocolError::malformed(
                "header response",
                format!("{} bytes received, at least {} expected", payload.len(), HEADER_DEF_SIZE),
            ));
        }

        let channel_count = u32_at(payload, 0);
        let sample_count = u32_at(payload, 4);
        let event_count = u32_at(payload, 8);
        let fsample = f32::from_le_bytes([payload[12], payload[13], payload[14], payload[15]]);
        let data_type = u32_at(payload, 16);
        let chunk_bytes = u32_at(payload, 20) as usize;

        let chunks = &payload[HEADER_DEF_SIZE..];
        if chunks.len() != chunk_bytes {
            return Err(ProtocolError::malformed(
                "header response",
                format!("{} chunk bytes received, {} declared", chunks.len(), chunk_bytes),
            ));
        }

        let sampling_frequency =
            if fsample.is_finite() && fsample > 0.0 { Some(f64::from(fsample)) } else { None };

        let channel_names = parse_channel_names(chunks, channel_count)?;

        Ok(StreamHeader {
            channel_count,
            channel_names,
            sampling_frequency,
            sample_count,
            event_count,
            data_type,
        })
    }

    /// Number of channels in the stream.
    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    /// Whether the server supplied channel names.
    pub fn found_channel_names(&self) -> bool {
        self.channel_names.is_some()
    }

    /// Name of channel `index`, or an empty string when the index is out of
    /// range or the server did not supply names.
    pub fn channel_name(&self, index: u32) -> &str {
        self.channel_names
            .as_deref()
            .and_then(|names| names.get(index as usize))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Nominal sampling frequency in Hz, if the server reported a usable one.
    pub fn sampling_frequency(&self) -> Option<f64> {
        self.sampling_frequency
    }

    /// Sample count buffered on the server at negotiation time.
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Event count buffered on the server at negotiation time.
    pub fn event_count(&self) -> u32 {
        self.event_count
    }

    /// Wire data-type code the server announced for this stream.
    pub fn data_type(&self) -> u32 {
        self.data_type
    }
}

/// Walk the chunk list looking for channel names.
///
/// A name chunk that does not hold exactly one NUL-terminated string per
/// channel is treated as absent, matching servers that write partial or
/// legacy chunks.
fn parse_channel_names(
    mut chunks: &[u8],
    channel_count: u32,
) -> Result<Option<Vec<String>>, ProtocolError> {
    while chunks.len() >= 8 {
        let chunk_type = u32_at(chunks, 0);
        let chunk_size = u32_at(chunks, 4) as usize;

        let body = &chunks[8..];
        if body.len() < chunk_size {
            return Err(ProtocolError::malformed(
                "header chunk",
                format!("chunk of {} bytes runs past the payload end", chunk_size),
            ));
        }

        if chunk_type == CHUNK_CHANNEL_NAMES {
            return Ok(decode_names(&body[..chunk_size], channel_count));
        }

        chunks = &body[chunk_size..];
    }

    if chunks.is_empty() {
        Ok(None)
    } else {
        Err(ProtocolError::malformed(
            "header chunk",
            format!("{} trailing bytes do not form a chunk", chunks.len()),
        ))
    }
}

fn decode_names(body: &[u8], channel_count: u32) -> Option<Vec<String>> {
    if body.last() != Some(&0) {
        return None;
    }

    let names: Vec<String> = body[..body.len() - 1]
        .split(|&byte| byte == 0)
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .collect();

    (names.len() == channel_count as usize).then_some(names)
}

// Caller has bounds-checked.
fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
