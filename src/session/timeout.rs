//! Liveness timeout tracking
//!
//! Pure state machine, no I/O. The connection reports every frame it sends
//! and receives; the shared liveness tick asks whether the peer has gone
//! silent.
//!
//! Two independent conditions end a connection:
//!
//! - **no response**: a PING (or CLOSE) was sent and the matching PONG (or
//!   CLOSE) did not arrive within `timeout`
//! - **keep-alive**: nothing at all was received for `keep_alive_timeout`
//!
//! When both hold at once, no response wins.

use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::constants::{DEFAULT_KEEP_ALIVE_TIMEOUT, DEFAULT_TIMEOUT};
use crate::protocol::{Frame, Opcode};

/// Why a connection timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutReason {
    /// An awaited PONG or CLOSE did not arrive in time
    NoResponse,
    /// No inbound traffic for the keep-alive window
    KeepAlive,
}

impl TimeoutReason {
    /// Short description, also used as the close reason
    pub fn as_str(self) -> &'static str {
        match self {
            TimeoutReason::NoResponse => "no-response",
            TimeoutReason::KeepAlive => "keep-alive",
        }
    }
}

impl std::fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection timeout state
#[derive(Debug)]
pub struct TimeoutManager {
    awaited_opcode: Option<Opcode>,
    deadline: Instant,
    last_input_time: Instant,
    timeout: Duration,
    keep_alive_timeout: Duration,
    timeout_reason: Option<TimeoutReason>,
}

impl TimeoutManager {
    /// Create a manager with the default timeouts
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_TIMEOUT, DEFAULT_KEEP_ALIVE_TIMEOUT)
    }

    /// Create a manager with custom timeouts
    pub fn with_timeouts(timeout: Duration, keep_alive_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            awaited_opcode: None,
            deadline: now,
            last_input_time: now,
            timeout,
            keep_alive_timeout,
            timeout_reason: None,
        }
    }

    /// Record a frame written to the peer
    ///
    /// A PING arms a wait for PONG unless a wait is already armed. A CLOSE
    /// always arms a wait for CLOSE, replacing a pending PONG wait.
    pub fn acknowledge_frame_sent(&mut self, frame: &Frame) {
        let awaited = match frame.opcode {
            Opcode::Ping if self.awaited_opcode.is_none() => Opcode::Pong,
            Opcode::Close if self.awaited_opcode != Some(Opcode::Close) => Opcode::Close,
            _ => return,
        };

        self.awaited_opcode = Some(awaited);
        self.deadline = Instant::now() + self.timeout;
    }

    /// Record a frame read from the peer
    pub fn acknowledge_frame_receipt(&mut self, frame: &Frame) {
        self.last_input_time = Instant::now();
        if self.awaited_opcode == Some(frame.opcode) {
            self.awaited_opcode = None;
        }
    }

    /// Check both timeout conditions and remember which one fired
    pub fn has_timed_out(&mut self) -> bool {
        let now = Instant::now();

        self.timeout_reason = if self.awaited_opcode.is_some() && now >= self.deadline {
            Some(TimeoutReason::NoResponse)
        } else if now.duration_since(self.last_input_time) >= self.keep_alive_timeout {
            Some(TimeoutReason::KeepAlive)
        } else {
            None
        };

        self.timeout_reason.is_some()
    }

    /// Reason computed by the last `has_timed_out` call that returned true
    pub fn timeout_reason(&self) -> Option<TimeoutReason> {
        self.timeout_reason
    }

    /// Opcode currently awaited from the peer
    pub fn awaited_opcode(&self) -> Option<Opcode> {
        self.awaited_opcode
    }

    /// Time of the last inbound frame
    pub fn last_input_time(&self) -> Instant {
        self.last_input_time
    }

    /// Configured no-response timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Configured keep-alive timeout
    pub fn keep_alive_timeout(&self) -> Duration {
        self.keep_alive_timeout
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new()
    }
}
