//! Test utilities: an in-process buffer server speaking the real wire
//! protocol over a loopback listener.
//!
//! The server owns a monotonically growing sample counter that tests drive
//! with [`MockBufferServer::add_samples`]. Sample values are synthesized
//! deterministically from their absolute index so tests can assert exact
//! buffer contents: sample `s` on channel `c` of an `n`-channel stream has
//! the value `(s * n + c) as f32`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::protocol::header::CHUNK_CHANNEL_NAMES;
use crate::protocol::{
    Command, DataRequest, Envelope, Message, SampleType, WaitRequest, WaitResponse,
};

/// Install a fmt subscriber honoring `RUST_LOG`, once per process.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Stream the mock server announces in its header.
#[derive(Debug, Clone)]
pub struct MockStream {
    pub channel_count: u32,
    pub channel_names: Option<Vec<String>>,
    pub sampling_frequency: f32,
}

impl MockStream {
    /// The four-channel 250 Hz stream most tests use.
    pub fn standard() -> Self {
        MockStream {
            channel_count: 4,
            channel_names: Some(
                ["Fz", "Cz", "Pz", "Oz"].into_iter().map(String::from).collect(),
            ),
            sampling_frequency: 250.0,
        }
    }

    /// A stream whose server reports no names and no usable rate.
    pub fn bare(channel_count: u32) -> Self {
        MockStream { channel_count, channel_names: None, sampling_frequency: 0.0 }
    }
}

/// In-process buffer server bound to an ephemeral loopback port.
pub struct MockBufferServer {
    host: String,
    port: u16,
    available: Arc<AtomicU64>,
    accept_task: JoinHandle<()>,
    conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MockBufferServer {
    /// Bind and start serving. Every accepted connection is served
    /// independently, so reconnects after a dropped session just work.
    pub async fn spawn(stream: MockStream) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener address");
        let available = Arc::new(AtomicU64::new(0));
        let conn_tasks = Arc::new(Mutex::new(Vec::new()));

        let accept_available = Arc::clone(&available);
        let accept_conn_tasks = Arc::clone(&conn_tasks);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((conn, peer)) = listener.accept().await else {
                    return;
                };
                debug!(%peer, "mock server accepted connection");
                let stream = stream.clone();
                let available = Arc::clone(&accept_available);
                let task = tokio::spawn(async move {
                    let _ = serve_connection(conn, stream, available).await;
                });
                accept_conn_tasks.lock().expect("conn task list").push(task);
            }
        });

        MockBufferServer {
            host: addr.ip().to_string(),
            port: addr.port(),
            available,
            accept_task,
            conn_tasks,
        }
    }

    /// Abort every live connection, as if the server process died mid-session.
    /// The listener keeps accepting, so clients may reconnect afterwards.
    pub fn drop_connections(&self) {
        for task in self.conn_tasks.lock().expect("conn task list").drain(..) {
            task.abort();
        }
    }

    /// Host the server listens on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the server listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Make `count` more samples visible to waiting clients.
    pub fn add_samples(&self, count: u64) {
        self.available.fetch_add(count, Ordering::SeqCst);
    }

    /// Current server-side sample total.
    pub fn sample_total(&self) -> u64 {
        self.available.load(Ordering::SeqCst)
    }

    /// Expected value of sample `index` on `channel`, mirroring the
    /// synthesizer inside the server.
    pub fn sample_value(channel_count: u32, index: u64, channel: u32) -> f32 {
        (index * u64::from(channel_count) + u64::from(channel)) as f32
    }
}

impl Drop for MockBufferServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

async fn serve_connection(
    mut conn: TcpStream,
    stream: MockStream,
    available: Arc<AtomicU64>,
) -> std::io::Result<()> {
    loop {
        let mut head = [0u8; Envelope::SIZE];
        if conn.read_exact(&mut head).await.is_err() {
            return Ok(()); // client went away
        }
        let envelope = Envelope::from_bytes(&head).expect("client sent a valid envelope");
        let mut payload = vec![0u8; envelope.payload_len as usize];
        conn.read_exact(&mut payload).await?;

        let request = Message::decode(
            &[&head[..], &payload[..]].concat(),
        )
        .expect("client sent a decodable message");

        let response = match request.command {
            Command::GetHeader => header_response(&stream, available.load(Ordering::SeqCst)),
            Command::WaitData => {
                let wait = WaitRequest::from_payload(&request.payload)
                    .expect("client sent a valid wait request");
                wait_response(&wait, &available).await
            }
            Command::GetData => {
                let get = DataRequest::from_payload(&request.payload)
                    .expect("client sent a valid data request");
                data_response(&stream, &get)
            }
            _ => Message::bare(Command::GetErr),
        };

        conn.write_all(&response.encode()).await?;
    }
}

fn header_response(stream: &MockStream, sample_total: u64) -> Message {
    let mut chunks = Vec::new();
    if let Some(names) = &stream.channel_names {
        let mut body = Vec::new();
        for name in names {
            body.extend_from_slice(name.as_bytes());
            body.push(0);
        }
        chunks.extend_from_slice(&CHUNK_CHANNEL_NAMES.to_le_bytes());
        chunks.extend_from_slice(&(body.len() as u32).to_le_bytes());
        chunks.extend_from_slice(&body);
    }

    let mut payload = Vec::new();
    payload.extend_from_slice(&stream.channel_count.to_le_bytes());
    payload.extend_from_slice(&(sample_total as u32).to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.extend_from_slice(&stream.sampling_frequency.to_le_bytes());
    payload.extend_from_slice(&SampleType::Float32.code().to_le_bytes());
    payload.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    payload.extend_from_slice(&chunks);

    Message::with_payload(Command::GetOk, payload)
}

/// Honor the wait contract: answer as soon as the sample total exceeds the
/// threshold, or when the client's timeout elapses, whichever happens first.
async fn wait_response(wait: &WaitRequest, available: &AtomicU64) -> Message {
    let deadline = tokio::time::Instant::now() + wait.timeout;
    let threshold = u64::from(wait.threshold_samples);

    loop {
        let total = available.load(Ordering::SeqCst);
        if total > threshold || tokio::time::Instant::now() >= deadline {
            let response =
                WaitResponse { sample_count: total as u32, event_count: 0 };
            return Message::with_payload(Command::WaitOk, response.to_payload());
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

fn data_response(stream: &MockStream, get: &DataRequest) -> Message {
    if get.end_sample < get.begin_sample {
        return Message::bare(Command::GetErr);
    }

    let frames = u64::from(get.end_sample - get.begin_sample) + 1;
    let mut matrix = Vec::with_capacity((frames * u64::from(stream.channel_count)) as usize);
    for index in u64::from(get.begin_sample)..=u64::from(get.end_sample) {
        for channel in 0..stream.channel_count {
            matrix.push(MockBufferServer::sample_value(stream.channel_count, index, channel));
        }
    }

    let payload = crate::protocol::data::encode_data_payload(stream.channel_count, &matrix);
    Message::with_payload(Command::GetOk, payload)
}
