//! Wire protocol for buffer-server communication.
//!
//! Every exchange with the server is one request message followed by one
//! response message. A message is a fixed 8-byte envelope followed by the
//! payload, all little-endian:
//!
//! ```text
//! u16  protocol version (currently 1)
//! u16  command code
//! u32  payload length in bytes
//! [payload]
//! ```
//!
//! The codec here is pure transformation: [`Message::encode`] and
//! [`Message::decode`] plus the typed payload structs in [`header`] and
//! [`data`]. All I/O lives in the session layer.

pub mod data;
pub mod header;

pub use data::{DataRequest, DataResponse, SampleType, WaitRequest, WaitResponse};
pub use header::StreamHeader;

use crate::error::ProtocolError;

/// Protocol version spoken by this client.
pub const PROTOCOL_VERSION: u16 = 1;

/// Command codes used on the wire.
///
/// Requests are in the client-to-server direction; `*Ok`/`*Err` are the
/// matching server responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    GetHeader = 0x201,
    GetData = 0x202,
    GetOk = 0x204,
    GetErr = 0x205,
    WaitData = 0x402,
    WaitOk = 0x404,
    WaitErr = 0x405,
}

impl Command {
    /// Look up a command by its wire code.
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0x201 => Some(Command::GetHeader),
            0x202 => Some(Command::GetData),
            0x204 => Some(Command::GetOk),
            0x205 => Some(Command::GetErr),
            0x402 => Some(Command::WaitData),
            0x404 => Some(Command::WaitOk),
            0x405 => Some(Command::WaitErr),
            _ => None,
        }
    }

    /// Wire code for this command.
    pub const fn code(self) -> u16 {
        self as u16
    }
}

/// The fixed message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub version: u16,
    pub command: u16,
    pub payload_len: u32,
}

impl Envelope {
    /// Envelope size on the wire, in bytes.
    pub const SIZE: usize = 8;

    /// Serialize the envelope.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.version.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.command.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
        bytes
    }

    /// Parse an envelope, rejecting unknown protocol versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::malformed(
                "message envelope",
                format!("{} bytes received, {} expected", bytes.len(), Self::SIZE),
            ));
        }

        let version = u16::from_le_bytes([bytes[0], bytes[1]]);
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }

        Ok(Envelope {
            version,
            command: u16::from_le_bytes([bytes[2], bytes[3]]),
            payload_len: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

/// A complete protocol message: command plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message with an empty payload.
    pub fn bare(command: Command) -> Self {
        Message { command, payload: Vec::new() }
    }

    /// Create a message carrying the given payload.
    pub fn with_payload(command: Command, payload: Vec<u8>) -> Self {
        Message { command, payload }
    }

    /// Encode envelope plus payload into one contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        let envelope = Envelope {
            version: PROTOCOL_VERSION,
            command: self.command.code(),
            payload_len: self.payload.len() as u32,
        };

        let mut bytes = Vec::with_capacity(Envelope::SIZE + self.payload.len());
        bytes.extend_from_slice(&envelope.to_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode a complete message from one contiguous buffer.
    ///
    /// The buffer must contain exactly one message; a declared payload
    /// length that disagrees with the buffer is a [`ProtocolError::Malformed`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope = Envelope::from_bytes(bytes)?;

        let body = &bytes[Envelope::SIZE..];
        if body.len() != envelope.payload_len as usize {
            return Err(ProtocolError::malformed(
                "message payload",
                format!("{} bytes received, {} declared", body.len(), envelope.payload_len),
            ));
        }

        let command = Command::from_code(envelope.command).ok_or_else(|| {
            ProtocolError::malformed(
                "message envelope",
                format!("unknown command {:#06x}", envelope.command),
            )
        })?;

        Ok(Message { command, payload: body.to_vec() })
    }
}
