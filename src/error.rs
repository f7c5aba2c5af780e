//! Error types
//!
//! Every error here is scoped to a single connection or a single call; none of
//! them is fatal to the process.

use crate::protocol::CloseCode;
use crate::session::TimeoutReason;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket-level failure, treated as an abrupt close
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame or disallowed frame sequence
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Peer failed to answer in time or stayed silent too long
    #[error("connection timed out: {0}")]
    Timeout(TimeoutReason),

    /// Subscription or delivery attempted under an invalidated context
    #[error("authorization context is no longer valid")]
    AuthorizationStale,

    /// Outbound queue overflow
    #[error("outbound queue is full")]
    ResourceExhausted,

    /// The upgrade handshake failed or did not finish in time
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Notification store failure
    #[error("notification store error: {0}")]
    Store(String),

    /// JSON encoding or decoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Framing and message-sequence violations
///
/// Always fatal to the connection that produced them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// RSV1-3 set without a negotiated extension
    #[error("reserved bits set")]
    ReservedBitsSet,

    /// Opcode outside the known set
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),

    /// Control frame with FIN cleared
    #[error("fragmented control frame")]
    FragmentedControlFrame,

    /// Control frame payload over 125 bytes
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLarge(u64),

    /// 64-bit length with the most significant bit set
    #[error("invalid payload length")]
    InvalidLength,

    /// Frame or reassembled message over the configured limit
    #[error("message of {size} bytes exceeds limit of {max}")]
    MessageTooLarge {
        /// Announced or accumulated size
        size: u64,
        /// Configured maximum
        max: usize,
    },

    /// Client frame without a masking key
    #[error("client frame is not masked")]
    UnmaskedFrame,

    /// Server frame carrying a masking key
    #[error("server frame is masked")]
    MaskedFrame,

    /// Close payload of exactly one byte
    #[error("malformed close payload")]
    InvalidClosePayload,

    /// Close code that may not appear on the wire
    #[error("invalid close code {0}")]
    InvalidCloseCode(u16),

    /// Text payload or close reason that is not UTF-8
    #[error("invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Continuation frame with no message in progress
    #[error("unexpected continuation frame")]
    UnexpectedContinuation,

    /// New data frame while a fragmented message is in progress
    #[error("new message started during fragmented message")]
    InterleavedMessage,
}

impl ProtocolError {
    /// Close code sent to the peer when failing the connection with this error
    pub fn close_code(&self) -> CloseCode {
        match self {
            ProtocolError::MessageTooLarge { .. } => CloseCode::MessageTooBig,
            ProtocolError::InvalidUtf8 => CloseCode::InconsistentData,
            _ => CloseCode::ProtocolError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_close_codes() {
        assert_eq!(
            ProtocolError::MessageTooLarge { size: 10, max: 5 }.close_code(),
            CloseCode::MessageTooBig
        );
        assert_eq!(
            ProtocolError::InvalidUtf8.close_code(),
            CloseCode::InconsistentData
        );
        assert_eq!(
            ProtocolError::UnmaskedFrame.close_code(),
            CloseCode::ProtocolError
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::from(ProtocolError::UnknownOpcode(0x3));
        assert_eq!(err.to_string(), "protocol error: unknown opcode 0x3");

        let err = Error::Timeout(TimeoutReason::KeepAlive);
        assert_eq!(err.to_string(), "connection timed out: keep-alive");
    }
}
