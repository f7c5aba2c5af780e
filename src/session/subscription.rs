//! Per-connection subscription cursors

use std::collections::HashMap;

use crate::store::Notification;

/// Channels a connection listens on, each with its own delivery cursor
///
/// A notification is accepted once per channel: only if its id is greater
/// than the channel's cursor, which then advances to that id.
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    cursors: HashMap<String, u64>,
}

impl Subscription {
    /// Subscribe to `channels`, all starting at cursor `last`
    pub fn new<I, S>(channels: I, last: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cursors: channels.into_iter().map(|c| (c.into(), last)).collect(),
        }
    }

    /// Whether `channel` is part of the subscription
    pub fn contains(&self, channel: &str) -> bool {
        self.cursors.contains_key(channel)
    }

    /// Current cursor of `channel`
    pub fn cursor(&self, channel: &str) -> Option<u64> {
        self.cursors.get(channel).copied()
    }

    /// Subscribed channels, in no particular order
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.cursors.keys().map(String::as_str)
    }

    /// Number of subscribed channels
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Whether no channel is subscribed
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Accept a notification for delivery, advancing its channel's cursor
    pub fn accept(&mut self, notification: &Notification) -> bool {
        match self.cursors.get_mut(&notification.channel) {
            Some(cursor) if notification.id > *cursor => {
                *cursor = notification.id;
                true
            }
            _ => false,
        }
    }
}
