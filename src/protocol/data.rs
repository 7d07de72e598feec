//! WAIT-DATA and GET-DATA payloads plus the sample-matrix decoder.
//!
//! Payload layouts, little-endian:
//!
//! ```text
//! WAIT-DATA request   u32 sample threshold, u32 event threshold, u32 timeout ms
//! WAIT-DATA response  u32 sample count, u32 event count
//! GET-DATA request    u32 begin sample, u32 end sample (inclusive)
//! GET-DATA response   u32 channels, u32 frames, u32 data type, u32 data bytes,
//!                     [frames x channels values, sample-major]
//! ```

use std::time::Duration;

use crate::error::ProtocolError;

/// Sample value encodings this client accepts, with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SampleType {
    Int16 = 6,
    Int32 = 7,
    Float32 = 9,
    Float64 = 10,
}

impl SampleType {
    /// Look up a sample type by its wire code.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            6 => Some(SampleType::Int16),
            7 => Some(SampleType::Int32),
            9 => Some(SampleType::Float32),
            10 => Some(SampleType::Float64),
            _ => None,
        }
    }

    /// Wire code for this sample type.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Encoded size of one value, in bytes.
    pub const fn value_size(self) -> usize {
        match self {
            SampleType::Int16 => 2,
            SampleType::Int32 => 4,
            SampleType::Float32 => 4,
            SampleType::Float64 => 8,
        }
    }
}

/// WAIT-DATA request: block server-side until the sample count exceeds the
/// threshold or the timeout elapses.
///
/// The sample threshold is an absolute count; the driver encodes
/// `known total + wanted new samples - 1` so the server answers exactly when
/// the wanted number of fresh samples exists. The event threshold is held at
/// `u32::MAX` by the driver so events never trigger the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRequest {
    pub threshold_samples: u32,
    pub threshold_events: u32,
    pub timeout: Duration,
}

impl WaitRequest {
    /// Serialize into a request payload.
    pub fn to_payload(&self) -> Vec<u8> {
        let timeout_ms = u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX);

        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&self.threshold_samples.to_le_bytes());
        payload.extend_from_slice(&self.threshold_events.to_le_bytes());
        payload.extend_from_slice(&timeout_ms.to_le_bytes());
        payload
    }

    /// Parse a request payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != 12 {
            return Err(ProtocolError::malformed(
                "wait-data request",
                format!("{} bytes received, 12 expected", payload.len()),
            ));
        }

        Ok(WaitRequest {
            threshold_samples: u32_at(payload, 0),
            threshold_events: u32_at(payload, 4),
            timeout: Duration::from_millis(u64::from(u32_at(payload, 8))),
        })
    }
}

/// WAIT-DATA response: the server's current totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitResponse {
    pub sample_count: u32,
    pub event_count: u32,
}

impl WaitResponse {
    /// Serialize into a response payload.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&self.sample_count.to_le_bytes());
        payload.extend_from_slice(&self.event_count.to_le_bytes());
        payload
    }

    /// Parse a response payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != 8 {
            return Err(ProtocolError::malformed(
                "wait-data response",
                format!("{} bytes received, 8 expected", payload.len()),
            ));
        }

        Ok(WaitResponse { sample_count: u32_at(payload, 0), event_count: u32_at(payload, 4) })
    }
}

/// GET-DATA request for an inclusive range of sample indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRequest {
    pub begin_sample: u32,
    pub end_sample: u32,
}

impl DataRequest {
    /// Serialize into a request payload.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&self.begin_sample.to_le_bytes());
        payload.extend_from_slice(&self.end_sample.to_le_bytes());
        payload
    }

    /// Parse a request payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != 8 {
            return Err(ProtocolError::malformed(
                "get-data request",
                format!("{} bytes received, 8 expected", payload.len()),
            ));
        }

        Ok(DataRequest { begin_sample: u32_at(payload, 0), end_sample: u32_at(payload, 4) })
    }
}

/// A parsed GET-DATA response borrowing the raw sample matrix.
///
/// Values stay in wire encoding until [`DataResponse::decode_into`] converts
/// them, so the hot path pays for one copy only.
#[derive(Debug)]
pub struct DataResponse<'a> {
    pub channel_count: u32,
    pub frame_count: u32,
    pub sample_type: SampleType,
    raw: &'a [u8],
}

impl<'a> DataResponse<'a> {
    /// Parse a response payload, validating the declared matrix dimensions
    /// against the bytes actually present.
    pub fn from_payload(payload: &'a [u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 16 {
            return Err(ProtocolError::malformed(
                "get-data response",
                format!("{} bytes received, at least 16 expected", payload.len()),
            ));
        }

        let channel_count = u32_at(payload, 0);
        let frame_count = u32_at(payload, 4);
        let type_code = u32_at(payload, 8);
        let data_bytes = u32_at(payload, 12) as usize;

        let sample_type = SampleType::from_code(type_code).ok_or_else(|| {
            ProtocolError::malformed("get-data response", format!("unknown data type {type_code}"))
        })?;

        let raw = &payload[16..];
        if raw.len() != data_bytes {
            return Err(ProtocolError::malformed(
                "get-data response",
                format!("{} data bytes received, {} declared", raw.len(), data_bytes),
            ));
        }

        let expected = (channel_count as usize)
            .checked_mul(frame_count as usize)
            .and_then(|values| values.checked_mul(sample_type.value_size()));
        if expected != Some(raw.len()) {
            return Err(ProtocolError::malformed(
                "get-data response",
                format!(
                    "{} data bytes do not hold {} frames x {} channels",
                    raw.len(),
                    frame_count,
                    channel_count
                ),
            ));
        }

        Ok(DataResponse { channel_count, frame_count, sample_type, raw })
    }

    /// Total number of values in the matrix.
    pub fn value_count(&self) -> usize {
        self.channel_count as usize * self.frame_count as usize
    }

    /// Decode every value into `out`, appending in wire order (sample-major).
    pub fn decode_into(&self, out: &mut Vec<f32>) {
        out.reserve(self.value_count());

        match self.sample_type {
            SampleType::Int16 => {
                for bytes in self.raw.chunks_exact(2) {
                    out.push(f32::from(i16::from_le_bytes([bytes[0], bytes[1]])));
                }
            }
            SampleType::Int32 => {
                for bytes in self.raw.chunks_exact(4) {
                    out.push(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32);
                }
            }
            SampleType::Float32 => {
                for bytes in self.raw.chunks_exact(4) {
                    out.push(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
                }
            }
            SampleType::Float64 => {
                for bytes in self.raw.chunks_exact(8) {
                    let mut wide = [0u8; 8];
                    wide.copy_from_slice(bytes);
                    out.push(f64::from_le_bytes(wide) as f32);
                }
            }
        }
    }
}

/// Build a GET-DATA response payload.
///
/// The client never sends data, but the codec stays symmetric so tests and
/// in-process servers can produce the matrices this module consumes.
pub fn encode_data_payload(channel_count: u32, frames: &[f32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + frames.len() * 4);
    let frame_count = if channel_count == 0 { 0 } else { frames.len() as u32 / channel_count };

    payload.extend_from_slice(&channel_count.to_le_bytes());
    payload.extend_from_slice(&frame_count.to_le_bytes());
    payload.extend_from_slice(&SampleType::Float32.code().to_le_bytes());
    payload.extend_from_slice(&((frames.len() * 4) as u32).to_le_bytes());
    for value in frames {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    payload
}

// Caller has bounds-checked.
fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
