//! Protocol constants
//!
//! Frame layout values follow RFC 6455. Timing defaults follow the bus the
//! crate replaces.

use std::time::Duration;

// Opcodes
pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

// First header byte
pub const FIN_BIT: u8 = 0x80;
pub const RSV_BITS: u8 = 0x70;
pub const OPCODE_MASK: u8 = 0x0F;

// Second header byte
pub const MASK_BIT: u8 = 0x80;
pub const LENGTH_MASK: u8 = 0x7F;
pub const LENGTH_16: u8 = 126;
pub const LENGTH_64: u8 = 127;

/// Maximum payload of a control frame
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Maximum close reason so that code + reason fit a control frame
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

/// Default limit for a single frame or reassembled message (1 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// How long to wait for a PONG or a CLOSE acknowledgement
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum inbound silence before the connection is closed
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Interval between server pings on an otherwise idle connection
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Period of the shared liveness tick
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Per-connection outbound queue capacity, in batches
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Window of recent notifications replayed to a subscriber with cursor 0
pub const DEFAULT_BACKLOG_WINDOW: Duration = Duration::from_secs(50);
