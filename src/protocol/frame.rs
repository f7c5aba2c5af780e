//! Frame, opcode and close code types

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::*;

/// Frame type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continuation of a fragmented data message
    Continuation,
    /// UTF-8 text data
    Text,
    /// Binary data
    Binary,
    /// Close handshake
    Close,
    /// Liveness probe
    Ping,
    /// Answer to a ping
    Pong,
}

impl Opcode {
    /// Parse the low nibble of the first header byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            OPCODE_CONTINUATION => Some(Opcode::Continuation),
            OPCODE_TEXT => Some(Opcode::Text),
            OPCODE_BINARY => Some(Opcode::Binary),
            OPCODE_CLOSE => Some(Opcode::Close),
            OPCODE_PING => Some(Opcode::Ping),
            OPCODE_PONG => Some(Opcode::Pong),
            _ => None,
        }
    }

    /// Wire value
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => OPCODE_CONTINUATION,
            Opcode::Text => OPCODE_TEXT,
            Opcode::Binary => OPCODE_BINARY,
            Opcode::Close => OPCODE_CLOSE,
            Opcode::Ping => OPCODE_PING,
            Opcode::Pong => OPCODE_PONG,
        }
    }

    /// Control frames may not be fragmented and carry at most 125 bytes
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// Close status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// Normal closure
    Clean,
    /// Server shutting down
    GoingAway,
    /// Framing violation
    ProtocolError,
    /// Message that could not be interpreted
    IncorrectData,
    /// Connection dropped without a close frame. Never sent.
    Abnormal,
    /// Text that is not valid UTF-8
    InconsistentData,
    /// Message over the size limit
    MessageTooBig,
    /// Unexpected server condition
    ServerError,
    /// Outbound queue overflow
    ResourceExhausted,
    /// The session the connection authenticated with is gone
    SessionExpired,
    /// Keep-alive or no-response timeout
    Timeout,
    /// Any other code
    Other(u16),
}

impl CloseCode {
    /// Numeric value
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Clean => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::IncorrectData => 1003,
            CloseCode::Abnormal => 1006,
            CloseCode::InconsistentData => 1007,
            CloseCode::MessageTooBig => 1009,
            CloseCode::ServerError => 1011,
            CloseCode::ResourceExhausted => 1013,
            CloseCode::SessionExpired => 4001,
            CloseCode::Timeout => 4002,
            CloseCode::Other(code) => code,
        }
    }

    /// Map a numeric value onto a known code, or `Other`
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Clean,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::IncorrectData,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InconsistentData,
            1009 => CloseCode::MessageTooBig,
            1011 => CloseCode::ServerError,
            1013 => CloseCode::ResourceExhausted,
            4001 => CloseCode::SessionExpired,
            4002 => CloseCode::Timeout,
            other => CloseCode::Other(other),
        }
    }

    /// Whether the code may appear in a close frame
    pub fn is_sendable(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.as_u16())
    }
}

/// One protocol message unit
///
/// Cheap to clone; the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message
    pub fin: bool,
    /// Frame type
    pub opcode: Opcode,
    /// Unmasked payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a final frame with the given opcode
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// Text frame
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    /// Binary frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// Ping frame
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// Pong frame
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Close frame carrying a code and a reason
    ///
    /// The reason is truncated on a character boundary to fit a control frame.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut end = reason.len().min(MAX_CLOSE_REASON);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }

        let mut payload = BytesMut::with_capacity(2 + end);
        payload.put_u16(code.as_u16());
        payload.put_slice(&reason.as_bytes()[..end]);
        Self::new(Opcode::Close, payload.freeze())
    }

    /// Close frame without a status code
    pub fn close_empty() -> Self {
        Self::new(Opcode::Close, Bytes::new())
    }

    /// Status code of a close frame, if any
    pub fn close_code(&self) -> Option<CloseCode> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        Some(CloseCode::from_u16(code))
    }

    /// Reason text of a close frame, if any
    pub fn close_reason(&self) -> Option<&str> {
        if self.opcode != Opcode::Close || self.payload.len() <= 2 {
            return None;
        }
        std::str::from_utf8(&self.payload[2..]).ok()
    }
}
