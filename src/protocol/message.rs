//! Application messages carried in data frames
//!
//! Inbound (client → server):
//!
//! ```json
//! {"event_name": "subscribe", "data": {"channels": ["channel1"], "last": 42}}
//! ```
//!
//! Outbound (server → client), one JSON array per delivered batch:
//!
//! ```json
//! [{"id": 43, "message": {"type": "notif type", "payload": "message"}}]
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Notification;

/// Event name of the subscription message
pub const SUBSCRIBE_EVENT: &str = "subscribe";

/// Parameters of a `subscribe` message
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubscribeParams {
    /// Channels to listen on; replaces any previous set
    #[serde(default)]
    pub channels: Vec<String>,
    /// Id of the last notification the client has seen
    #[serde(default)]
    pub last: u64,
}

impl SubscribeParams {
    /// Decode the `data` member of a `subscribe` message
    pub fn from_data(data: serde_json::Value) -> Result<Self> {
        if data.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(data)?)
    }
}

/// Inbound message, decoded up to its event name
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Replace the connection's subscription; `data` is still undecoded
    Subscribe(serde_json::Value),
    /// Application-defined event outside the transport's concern
    Unrecognized {
        /// The event name as sent
        event_name: String,
    },
}

#[derive(Deserialize)]
struct RawMessage {
    event_name: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl InboundMessage {
    /// Parse a message from a data frame payload
    ///
    /// Only the envelope is checked here; see [`SubscribeParams::from_data`].
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let raw: RawMessage = serde_json::from_slice(payload)?;

        match raw.event_name.as_str() {
            SUBSCRIBE_EVENT => Ok(InboundMessage::Subscribe(raw.data)),
            _ => Ok(InboundMessage::Unrecognized {
                event_name: raw.event_name,
            }),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    message: Body<'a>,
}

#[derive(Serialize)]
struct Body<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: &'a serde_json::Value,
}

/// Serialize a batch of notifications into the outbound JSON array
pub fn encode_notifications<'a, I>(notifications: I) -> Result<String>
where
    I: IntoIterator<Item = &'a Arc<Notification>>,
{
    let envelopes: Vec<Envelope<'_>> = notifications
        .into_iter()
        .map(|n| Envelope {
            id: n.id,
            message: Body {
                kind: &n.kind,
                payload: &n.payload,
            },
        })
        .collect();

    Ok(serde_json::to_string(&envelopes)?)
}
