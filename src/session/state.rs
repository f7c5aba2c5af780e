//! Connection state machine
//!
//! Tracks a connection from upgrade to socket teardown.
//!
//! ```text
//! Connecting ──open()──► Open ──begin_closing()──► Closing ──complete_close()──► Closed
//!      │                   │                                                     ▲
//!      └───────────────────┴──────────────── complete_close() ───────────────────┘
//! ```

use tokio::time::Instant;

use crate::protocol::CloseCode;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Upgraded, not yet serving
    Connecting,
    /// Serving frames
    Open,
    /// Close handshake in progress
    Closing,
    /// Terminal
    Closed,
}

/// Which side started the close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    /// This server
    Local,
    /// The peer
    Remote,
}

/// Lifecycle state of one connection
#[derive(Debug)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    created_at: Instant,
    opened_at: Option<Instant>,
    closing_since: Option<Instant>,
    close_code: Option<CloseCode>,
    initiator: Option<CloseInitiator>,
}

impl ConnectionState {
    /// Create a state in the `Connecting` phase
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Connecting,
            created_at: Instant::now(),
            opened_at: None,
            closing_since: None,
            close_code: None,
            initiator: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Whether frames and messages are being served
    pub fn is_open(&self) -> bool {
        self.phase == ConnectionPhase::Open
    }

    /// Whether the terminal phase was reached
    pub fn is_closed(&self) -> bool {
        self.phase == ConnectionPhase::Closed
    }

    /// `Connecting → Open`. Returns false from any other phase.
    pub fn open(&mut self) -> bool {
        if self.phase != ConnectionPhase::Connecting {
            return false;
        }
        self.phase = ConnectionPhase::Open;
        self.opened_at = Some(Instant::now());
        true
    }

    /// `Open → Closing`, recording the code and who initiated
    ///
    /// Returns false if a close is already under way.
    pub fn begin_closing(&mut self, code: CloseCode, initiator: CloseInitiator) -> bool {
        if !matches!(self.phase, ConnectionPhase::Connecting | ConnectionPhase::Open) {
            return false;
        }
        self.phase = ConnectionPhase::Closing;
        self.closing_since = Some(Instant::now());
        self.close_code = Some(code);
        self.initiator = Some(initiator);
        true
    }

    /// Enter `Closed` from any phase
    ///
    /// `fallback` is recorded when no close code was set yet. Returns true
    /// only on the first call.
    pub fn complete_close(&mut self, fallback: CloseCode) -> bool {
        if self.phase == ConnectionPhase::Closed {
            return false;
        }
        self.phase = ConnectionPhase::Closed;
        self.close_code.get_or_insert(fallback);
        true
    }

    /// Close code recorded on the way out
    pub fn close_code(&self) -> Option<CloseCode> {
        self.close_code
    }

    /// Which side initiated the close, if a handshake started
    pub fn initiator(&self) -> Option<CloseInitiator> {
        self.initiator
    }

    /// When the connection entered `Open`
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// When the connection entered `Closing`
    pub fn closing_since(&self) -> Option<Instant> {
        self.closing_since
    }

    /// Time since the state was created
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
