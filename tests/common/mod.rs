//! Shared helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use wsbus::protocol::{FrameCodec, Opcode};
use wsbus::server::{Connection, Hub, ServerConfig, Upgrader};
use wsbus::{AuthContext, CloseCode, Frame, MemoryNotificationStore, MemorySessionStore, Result};

/// Peer speaking the client side of the framing
pub struct TestClient<S> {
    stream: S,
    codec: FrameCodec,
    buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            codec: FrameCodec::client(),
            buf: BytesMut::new(),
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        let mut out = BytesMut::new();
        self.codec.encode(&frame, &mut out);
        self.send_raw(&out).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn subscribe(&mut self, channels: &[&str], last: u64) {
        let message = serde_json::json!({
            "event_name": "subscribe",
            "data": {"channels": channels, "last": last},
        });
        self.send(Frame::text(message.to_string())).await;
    }

    /// Next frame, `None` once the server closed the stream
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf).unwrap() {
                return Some(frame);
            }
            if self.stream.read_buf(&mut self.buf).await.unwrap_or(0) == 0 {
                return None;
            }
        }
    }

    /// Next frame, failing the test if none arrives within a second
    pub async fn recv_timeout(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(1), self.recv())
            .await
            .expect("timed out waiting for a frame")
    }

    /// Ids of the next notification batch
    pub async fn recv_ids(&mut self) -> Vec<u64> {
        let frame = self.recv_timeout().await.expect("stream closed");
        assert_eq!(frame.opcode, Opcode::Text, "expected a notification batch");

        let batch: Vec<serde_json::Value> = serde_json::from_slice(&frame.payload).unwrap();
        batch.iter().map(|n| n["id"].as_u64().unwrap()).collect()
    }

    /// Expect a CLOSE frame and return its code
    pub async fn expect_close(&mut self) -> Option<CloseCode> {
        let frame = self.recv_timeout().await.expect("stream closed");
        assert_eq!(frame.opcode, Opcode::Close, "expected a close frame, got {frame:?}");
        frame.close_code()
    }

    /// Acknowledge a server close and wait for the stream to end
    pub async fn finish_close(&mut self, code: CloseCode) {
        self.send(Frame::close(code, "")).await;
        assert!(self.recv_timeout().await.is_none());
    }
}

/// In-memory stores, a hub and the relay between them
pub struct Harness {
    pub sessions: Arc<MemorySessionStore>,
    pub store: Arc<MemoryNotificationStore>,
    pub hub: Arc<Hub>,
    pub config: ServerConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let sessions = Arc::new(MemorySessionStore::new());
        let store = Arc::new(MemoryNotificationStore::new());
        let hub = Arc::new(Hub::new(sessions.clone(), store.clone()));
        hub.spawn_relay(store.subscribe_changes());

        Self {
            sessions,
            store,
            hub,
            config,
        }
    }

    /// Open a connection for a fresh logged-in session
    pub fn connect(
        &self,
        user_id: u64,
    ) -> (TestClient<DuplexStream>, AuthContext, JoinHandle<Result<()>>) {
        let auth = self.sessions.create(format!("session-{user_id}"), Some(user_id));
        let (client, server) = tokio::io::duplex(64 * 1024);
        let peer: SocketAddr = format!("127.0.0.1:{}", 20000 + user_id).parse().unwrap();

        let connection = Connection::new(
            Arc::clone(&self.hub),
            server,
            peer,
            auth.clone(),
            &self.config,
        );
        let task = tokio::spawn(connection.run());

        (TestClient::new(client), auth, task)
    }

    /// Wait until the dispatcher sees `count` subscribed connections
    pub async fn wait_for_subscribers(&self, count: usize) {
        let dispatcher = self.hub.dispatcher();
        tokio::time::timeout(Duration::from_secs(1), async {
            while dispatcher.subscriber_count().await != count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscribers did not register");
    }
}

/// Upgrader reading a single `<session id>\n` preamble line
///
/// The session store is consulted only later, on subscribe.
pub struct PreambleUpgrader;

#[async_trait]
impl Upgrader for PreambleUpgrader {
    type Stream = TcpStream;

    async fn upgrade(
        &self,
        mut socket: TcpStream,
        _peer_addr: SocketAddr,
    ) -> Result<(TcpStream, AuthContext)> {
        let mut line = Vec::new();
        loop {
            let byte = socket.read_u8().await?;
            if byte == b'\n' {
                break;
            }
            line.push(byte);
        }

        let session_id = String::from_utf8_lossy(&line).trim().to_string();
        let user_id = session_id.rsplit('-').next().and_then(|s| s.parse().ok());
        Ok((socket, AuthContext { session_id, user_id }))
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
