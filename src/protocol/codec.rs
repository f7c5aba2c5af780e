//! Frame encoding and decoding
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! The codec holds no per-stream state: `decode` either consumes exactly one
//! frame from the buffer or leaves it untouched.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

use super::constants::*;
use super::frame::{CloseCode, Frame, Opcode};

/// Which end of the connection the codec serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Expects masked input, writes unmasked frames
    Server,
    /// Expects unmasked input, writes masked frames
    Client,
}

/// Stateless frame codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    role: Role,
    max_payload: usize,
}

impl FrameCodec {
    /// Create a codec for the given role
    pub fn new(role: Role, max_payload: usize) -> Self {
        Self { role, max_payload }
    }

    /// Server-side codec with the default size limit
    pub fn server() -> Self {
        Self::new(Role::Server, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Client-side codec with the default size limit
    pub fn client() -> Self {
        Self::new(Role::Client, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Get the codec role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Decode one frame from the front of `buf`
    ///
    /// Returns `Ok(None)` without consuming anything when the buffer does not
    /// yet hold a complete frame.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let b0 = buf[0];
        let b1 = buf[1];

        if b0 & RSV_BITS != 0 {
            return Err(ProtocolError::ReservedBitsSet);
        }

        let fin = b0 & FIN_BIT != 0;
        let raw_opcode = b0 & OPCODE_MASK;
        let opcode = Opcode::from_u8(raw_opcode).ok_or(ProtocolError::UnknownOpcode(raw_opcode))?;

        let masked = b1 & MASK_BIT != 0;
        match (self.role, masked) {
            (Role::Server, false) => return Err(ProtocolError::UnmaskedFrame),
            (Role::Client, true) => return Err(ProtocolError::MaskedFrame),
            _ => {}
        }

        let (payload_len, length_bytes) = match b1 & LENGTH_MASK {
            LENGTH_16 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 2)
            }
            LENGTH_64 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(ProtocolError::InvalidLength);
                }
                (len, 8)
            }
            len => (len as u64, 0),
        };

        if opcode.is_control() {
            if !fin {
                return Err(ProtocolError::FragmentedControlFrame);
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(ProtocolError::ControlFrameTooLarge(payload_len));
            }
        }

        if payload_len > self.max_payload as u64 {
            return Err(ProtocolError::MessageTooLarge {
                size: payload_len,
                max: self.max_payload,
            });
        }

        let payload_len = payload_len as usize;
        let header_len = 2 + length_bytes + if masked { 4 } else { 0 };
        if buf.len() < header_len + payload_len {
            return Ok(None);
        }

        buf.advance(2 + length_bytes);
        let mask = if masked {
            let mut key = [0u8; 4];
            buf.copy_to_slice(&mut key);
            Some(key)
        } else {
            None
        };

        let mut payload = buf.split_to(payload_len);
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        let frame = Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        };

        if opcode == Opcode::Close {
            validate_close_payload(&frame)?;
        }

        Ok(Some(frame))
    }

    /// Append the wire form of `frame` to `dst`
    pub fn encode(&self, frame: &Frame, dst: &mut BytesMut) {
        let len = frame.payload.len();
        let mask_flag = if self.role == Role::Client { MASK_BIT } else { 0 };

        dst.reserve(14 + len);

        let fin = if frame.fin { FIN_BIT } else { 0 };
        dst.put_u8(fin | frame.opcode.as_u8());

        if len < LENGTH_16 as usize {
            dst.put_u8(mask_flag | len as u8);
        } else if len <= u16::MAX as usize {
            dst.put_u8(mask_flag | LENGTH_16);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(mask_flag | LENGTH_64);
            dst.put_u64(len as u64);
        }

        match self.role {
            Role::Server => dst.put_slice(&frame.payload),
            Role::Client => {
                let key: [u8; 4] = rand::random();
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&frame.payload);
                apply_mask(&mut dst[start..], key);
            }
        }
    }
}

/// XOR `data` in place with the 4-byte masking key
fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

fn validate_close_payload(frame: &Frame) -> Result<(), ProtocolError> {
    match frame.payload.len() {
        0 => Ok(()),
        1 => Err(ProtocolError::InvalidClosePayload),
        _ => {
            let code = u16::from_be_bytes([frame.payload[0], frame.payload[1]]);
            if !CloseCode::is_sendable(code) {
                return Err(ProtocolError::InvalidCloseCode(code));
            }
            std::str::from_utf8(&frame.payload[2..]).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(())
        }
    }
}
