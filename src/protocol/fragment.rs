//! Data message reassembly
//!
//! A message is either a single TEXT/BINARY frame with FIN set, or a first
//! fragment (FIN clear) followed by CONTINUATION frames, the last of which has
//! FIN set. Control frames may be interleaved between fragments and are
//! handled by the caller before reaching the assembler.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;

use super::frame::{Frame, Opcode};

/// A complete data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// `Text` or `Binary`
    pub opcode: Opcode,
    /// Reassembled payload
    pub payload: Bytes,
}

impl Message {
    /// Payload as text, for TEXT messages (validated on completion)
    pub fn as_text(&self) -> Option<&str> {
        if self.opcode == Opcode::Text {
            std::str::from_utf8(&self.payload).ok()
        } else {
            None
        }
    }
}

/// Reassembly state for one connection
#[derive(Debug)]
pub struct MessageAssembler {
    opcode: Option<Opcode>,
    buffer: BytesMut,
    max_size: usize,
}

impl MessageAssembler {
    /// Create an assembler that rejects messages over `max_size` bytes
    pub fn new(max_size: usize) -> Self {
        Self {
            opcode: None,
            buffer: BytesMut::new(),
            max_size,
        }
    }

    /// Whether a fragmented message is in progress
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Feed a data frame
    ///
    /// Returns the message once its final fragment arrives. Any error resets
    /// the assembler.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        let result = self.push_inner(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn push_inner(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary if self.is_assembling() => {
                Err(ProtocolError::InterleavedMessage)
            }
            Opcode::Text | Opcode::Binary if frame.fin => {
                self.check_size(frame.payload.len())?;
                complete(frame.opcode, frame.payload).map(Some)
            }
            Opcode::Text | Opcode::Binary => {
                self.check_size(frame.payload.len())?;
                self.opcode = Some(frame.opcode);
                self.buffer.extend_from_slice(&frame.payload);
                Ok(None)
            }
            Opcode::Continuation => {
                let Some(opcode) = self.opcode else {
                    return Err(ProtocolError::UnexpectedContinuation);
                };
                self.check_size(self.buffer.len() + frame.payload.len())?;
                self.buffer.extend_from_slice(&frame.payload);

                if !frame.fin {
                    return Ok(None);
                }

                self.opcode = None;
                let payload = self.buffer.split().freeze();
                complete(opcode, payload).map(Some)
            }
            // Control frames are handled before reassembly
            Opcode::Close | Opcode::Ping | Opcode::Pong => Ok(None),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: size as u64,
                max: self.max_size,
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.opcode = None;
        self.buffer.clear();
    }
}

fn complete(opcode: Opcode, payload: Bytes) -> Result<Message, ProtocolError> {
    if opcode == Opcode::Text && std::str::from_utf8(&payload).is_err() {
        return Err(ProtocolError::InvalidUtf8);
    }
    Ok(Message { opcode, payload })
}
