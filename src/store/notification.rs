//! Notification record

use tokio::time::Instant;

/// One message published on a channel
///
/// Ids are assigned by the notification store and increase monotonically;
/// subscribers use them as cursors.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Store-assigned sequence number
    pub id: u64,
    /// Routing key
    pub channel: String,
    /// Notification type, forwarded to clients as `type`
    pub kind: String,
    /// Arbitrary JSON payload
    pub payload: serde_json::Value,
    /// When the store accepted the notification
    pub created_at: Instant,
}

impl Notification {
    /// Create a notification stamped with the current time
    pub fn new(
        id: u64,
        channel: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id,
            channel: channel.into(),
            kind: kind.into(),
            payload,
            created_at: Instant::now(),
        }
    }
}
