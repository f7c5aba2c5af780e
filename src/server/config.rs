//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::constants::*;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Wait for a PONG or CLOSE acknowledgement
    pub timeout: Duration,

    /// Maximum inbound silence before the connection is closed
    pub keep_alive_timeout: Duration,

    /// Idle time after which the server sends a PING
    pub ping_interval: Duration,

    /// Period of the shared liveness tick
    pub tick_interval: Duration,

    /// Capacity of each connection's outbound queue, in batches
    pub outbound_queue_capacity: usize,

    /// Maximum frame or reassembled message size
    pub max_message_size: usize,

    /// Application-level read buffer size
    pub read_buffer_size: usize,

    /// Maximum time a single frame write may take
    pub write_timeout: Duration,

    /// Upgrade handshake must complete within this time
    pub handshake_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// How long shutdown waits for connections to finish closing
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8072)),
            max_connections: 0, // Unlimited
            timeout: DEFAULT_TIMEOUT,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            tick_interval: DEFAULT_TICK_INTERVAL,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_buffer_size: 16 * 1024,
            write_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the acknowledgement timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the keep-alive timeout
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Set the ping interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the liveness tick period
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the outbound queue capacity
    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity.max(1);
        self
    }

    /// Set the maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the shutdown grace period
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Check that the timing options are consistent
    pub fn validate(&self) -> Result<()> {
        if self.keep_alive_timeout <= self.ping_interval {
            return Err(Error::Config(format!(
                "keep_alive_timeout ({:?}) must exceed ping_interval ({:?})",
                self.keep_alive_timeout, self.ping_interval
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::Config("tick_interval must be non-zero".into()));
        }
        if self.max_message_size < MAX_CONTROL_PAYLOAD {
            return Err(Error::Config(format!(
                "max_message_size must be at least {MAX_CONTROL_PAYLOAD} bytes"
            )));
        }
        Ok(())
    }
}
