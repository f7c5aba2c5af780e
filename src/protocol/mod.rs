//! Wire protocol
//!
//! Frame layout, the frame codec, fragmented message reassembly and the JSON
//! messages exchanged over data frames.

pub mod codec;
pub mod constants;
pub mod fragment;
pub mod frame;
pub mod message;

pub use codec::{FrameCodec, Role};
pub use fragment::{Message, MessageAssembler};
pub use frame::{CloseCode, Frame, Opcode};
pub use message::{encode_notifications, InboundMessage, SubscribeParams};
