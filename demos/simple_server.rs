//! Simple notification server
//!
//! Run with: cargo run --example simple_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example simple_server                    # binds to 0.0.0.0:8072
//!   cargo run --example simple_server 127.0.0.1:9000     # binds to 127.0.0.1:9000
//!
//! The HTTP upgrade is out of scope for the crate, so this demo uses a toy
//! handshake: the client sends one line `<session id>\n`, after which the
//! socket carries frames. Sessions `demo-1` through `demo-3` exist (user ids
//! 1 to 3). A background task publishes a notification on channel `clock`
//! every five seconds.
//!
//! Subscribe by sending a masked text frame with:
//!
//! ```json
//! {"event_name": "subscribe", "data": {"channels": ["clock"], "last": 0}}
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use wsbus::server::{HookEvent, NotifyServer, ServerConfig, Upgrader};
use wsbus::{AuthContext, AuthStore, Error, MemoryNotificationStore, MemorySessionStore, Result};

/// Reads a `<session id>\n` line and rejects unknown sessions
struct PreambleUpgrader {
    sessions: Arc<MemorySessionStore>,
}

#[async_trait]
impl Upgrader for PreambleUpgrader {
    type Stream = TcpStream;

    async fn upgrade(
        &self,
        mut socket: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(TcpStream, AuthContext)> {
        let mut line = Vec::with_capacity(64);
        loop {
            let byte = socket.read_u8().await?;
            if byte == b'\n' {
                break;
            }
            if line.len() >= 256 {
                return Err(Error::Handshake("preamble too long".into()));
            }
            line.push(byte);
        }

        let session_id = String::from_utf8_lossy(&line).trim().to_string();
        let user_id = session_id
            .strip_prefix("demo-")
            .and_then(|id| id.parse().ok());

        let auth = AuthContext { session_id, user_id };
        if !self.sessions.is_valid(&auth).await {
            return Err(Error::Handshake(format!("unknown session from {peer_addr}")));
        }
        Ok((socket, auth))
    }
}

fn print_usage() {
    eprintln!("Usage: simple_server [BIND_ADDR]");
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let bind_addr: SocketAddr = match std::env::args().nth(1) {
        Some(arg) => match arg.parse() {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                print_usage();
                std::process::exit(1);
            }
        },
        None => ServerConfig::default().bind_addr,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wsbus=debug".parse()?)
                .add_directive("simple_server=debug".parse()?),
        )
        .init();

    let sessions = Arc::new(MemorySessionStore::new());
    for user in 1..=3 {
        sessions.create(format!("demo-{user}"), Some(user));
    }

    let store = Arc::new(MemoryNotificationStore::new());
    let _gc = store.spawn_gc_task();

    let config = ServerConfig::with_addr(bind_addr);
    let upgrader = PreambleUpgrader {
        sessions: Arc::clone(&sessions),
    };
    let server = NotifyServer::new(config, upgrader, sessions.clone(), store.clone())?;

    server.hub().hooks().register(HookEvent::Open, |ctx| {
        tracing::info!(connection_id = %ctx.connection_id, session = %ctx.session_id(), "Client connected");
        Ok(())
    });
    server.hub().hooks().register(HookEvent::Close, |ctx| {
        tracing::info!(connection_id = %ctx.connection_id, code = ?ctx.close_code, "Client disconnected");
        Ok(())
    });
    server.hub().spawn_relay(store.subscribe_changes());

    // Publish a counter on `clock`
    let clock_store = Arc::clone(&store);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let mut tick = 0u64;
        loop {
            interval.tick().await;
            tick += 1;
            clock_store.send_one("clock", "tick", json!({ "tick": tick }));
        }
    });

    println!("Starting notification server on {}", server.bind_addr());
    println!("Connect with a session line such as `demo-1`, then subscribe to `clock`.");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    let stats = server.hub().stats().snapshot();
    println!(
        "Served {} connections, delivered {} notifications",
        stats.connections_total, stats.notifications_delivered
    );

    Ok(())
}
