//! Connection session to the buffer server.
//!
//! Owns the host/port identity and the TCP stream, and hides all
//! socket-level concerns (partial reads and writes, timeouts, peer
//! disconnects) behind a single request/response primitive:
//! [`BufferSession::exchange`] sends one complete message and blocks, with a
//! bounded wait, until one complete response has been read.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{ConnectionError, ProtocolError, Result};
use crate::protocol::{Command, Envelope, Message};

/// Upper bound on a response payload before we assume a corrupt length
/// field. The largest legitimate payload is one data block, far below this.
const MAX_PAYLOAD_BYTES: u32 = 64 * 1024 * 1024;

/// One transport session between the driver and a buffer server.
#[derive(Debug)]
pub struct BufferSession {
    host: String,
    port: u16,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl BufferSession {
    /// Create a disconnected session for the given identity.
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        BufferSession { host: host.into(), port, connect_timeout, stream: None }
    }

    /// Server host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether a transport connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the transport connection.
    ///
    /// Fails with [`ConnectionError::AlreadyConnected`] when a connection
    /// exists, [`ConnectionError::Timeout`] when the connect attempt exceeds
    /// the configured bound, and [`ConnectionError::Refused`] otherwise.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.stream.is_some() {
            return Err(ConnectionError::AlreadyConnected {
                host: self.host.clone(),
                port: self.port,
            });
        }

        trace!(host = %self.host, port = self.port, "connecting to buffer server");
        let attempt = TcpStream::connect((self.host.as_str(), self.port));
        let stream = timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| ConnectionError::Timeout { duration: self.connect_timeout })?
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::TimedOut => {
                    ConnectionError::Timeout { duration: self.connect_timeout }
                }
                _ => ConnectionError::Refused { host: self.host.clone(), port: self.port, source },
            })?;

        // Latency over throughput on this socket.
        let _ = stream.set_nodelay(true);

        debug!(host = %self.host, port = self.port, "connected to buffer server");
        self.stream = Some(stream);
        Ok(())
    }

    /// Release the transport connection. Safe to call when not connected.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(host = %self.host, port = self.port, "disconnected from buffer server");
        }
    }

    /// Send one request and read one complete response, bounded by
    /// `reply_timeout`.
    ///
    /// On any transport failure the connection handle is dropped, so a later
    /// `start()` can re-establish the session cleanly.
    pub async fn exchange(&mut self, request: &Message, reply_timeout: Duration) -> Result<Message> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ConnectionError::Closed.into());
        };

        trace!(command = ?request.command, payload_len = request.payload.len(), "exchange");
        let outcome = timeout(reply_timeout, round_trip(stream, request)).await;

        match outcome {
            Ok(Ok(response)) => {
                trace!(command = ?response.command, payload_len = response.payload.len(), "response");
                Ok(response)
            }
            Ok(Err(error)) => {
                self.stream = None;
                Err(error)
            }
            Err(_) => {
                self.stream = None;
                Err(ConnectionError::Timeout { duration: reply_timeout }.into())
            }
        }
    }
}

/// Write the full request, then read exactly one envelope plus payload.
async fn round_trip(stream: &mut TcpStream, request: &Message) -> Result<Message> {
    stream.write_all(&request.encode()).await.map_err(map_io)?;

    let mut head = [0u8; Envelope::SIZE];
    stream.read_exact(&mut head).await.map_err(map_io)?;
    let envelope = Envelope::from_bytes(&head)?;

    if envelope.payload_len > MAX_PAYLOAD_BYTES {
        return Err(ProtocolError::malformed(
            "message envelope",
            format!("implausible payload length {}", envelope.payload_len),
        )
        .into());
    }

    let mut payload = vec![0u8; envelope.payload_len as usize];
    stream.read_exact(&mut payload).await.map_err(map_io)?;

    let command = Command::from_code(envelope.command).ok_or_else(|| {
        ProtocolError::malformed(
            "message envelope",
            format!("unknown command {:#06x}", envelope.command),
        )
    })?;

    Ok(Message { command, payload })
}

/// Any I/O failure mid-exchange means the peer went away.
fn map_io(_: std::io::Error) -> crate::error::AcquisitionError {
    ConnectionError::Closed.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

    async fn bound_listener() -> (TcpListener, String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn connect_twice_is_already_connected() {
        let (listener, host, port) = bound_listener().await;
        // Keep the listener alive so the first connect succeeds.
        let _guard = tokio::spawn(async move {
            let _conn = listener.accept().await;
            std::future::pending::<()>().await;
        });

        let mut session = BufferSession::new(host, port, Duration::from_secs(1));
        session.connect().await.unwrap();
        assert!(session.is_connected());

        let result = session.connect().await;
        assert!(matches!(result, Err(ConnectionError::AlreadyConnected { .. })));
    }

    #[tokio::test]
    async fn connect_to_dead_port_is_refused() {
        // Bind then drop to get a port with nothing listening.
        let (listener, host, port) = bound_listener().await;
        drop(listener);

        let mut session = BufferSession::new(host, port, Duration::from_secs(1));
        let result = session.connect().await;
        assert!(matches!(result, Err(ConnectionError::Refused { .. })));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut session = BufferSession::new("localhost", 1972, Duration::from_secs(1));
        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn exchange_without_connection_is_closed() {
        let mut session = BufferSession::new("localhost", 1972, Duration::from_secs(1));
        let result = session.exchange(&Message::bare(Command::GetHeader), REPLY_TIMEOUT).await;
        assert!(matches!(
            result,
            Err(crate::error::AcquisitionError::Connection(ConnectionError::Closed))
        ));
    }

    #[tokio::test]
    async fn exchange_roundtrips_one_message() {
        let (listener, host, port) = bound_listener().await;
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();

            let mut head = [0u8; Envelope::SIZE];
            conn.read_exact(&mut head).await.unwrap();
            let envelope = Envelope::from_bytes(&head).unwrap();
            let mut payload = vec![0u8; envelope.payload_len as usize];
            conn.read_exact(&mut payload).await.unwrap();
            assert_eq!(envelope.command, Command::WaitData.code());

            // Echo the payload back under a response command.
            let response = Message::with_payload(Command::WaitOk, payload);
            conn.write_all(&response.encode()).await.unwrap();
        });

        let mut session = BufferSession::new(host, port, Duration::from_secs(1));
        session.connect().await.unwrap();

        let request = Message::with_payload(Command::WaitData, vec![9, 8, 7]);
        let response = session.exchange(&request, REPLY_TIMEOUT).await.unwrap();
        assert_eq!(response.command, Command::WaitOk);
        assert_eq!(response.payload, vec![9, 8, 7]);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn peer_close_mid_exchange_is_closed() {
        let (listener, host, port) = bound_listener().await;
        tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            drop(conn);
        });

        let mut session = BufferSession::new(host, port, Duration::from_secs(1));
        session.connect().await.unwrap();

        let result = session.exchange(&Message::bare(Command::GetHeader), REPLY_TIMEOUT).await;
        assert!(matches!(
            result,
            Err(crate::error::AcquisitionError::Connection(ConnectionError::Closed))
        ));
        // The handle is gone; a reconnect is allowed again.
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (listener, host, port) = bound_listener().await;
        let _guard = tokio::spawn(async move {
            let _conn = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut session = BufferSession::new(host, port, Duration::from_secs(1));
        session.connect().await.unwrap();

        let result = session
            .exchange(&Message::bare(Command::GetHeader), Duration::from_millis(50))
            .await;
        assert!(matches!(
            result,
            Err(crate::error::AcquisitionError::Connection(ConnectionError::Timeout { .. }))
        ));
    }
}
