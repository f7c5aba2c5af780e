//! Channel to subscriber mapping

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::registry::{ConnectionHandle, ConnectionId};

/// A connection's entry in the table
///
/// Every replacement gets a fresh generation; batches are tagged with it so
/// the connection can tell them apart from leftovers of an older
/// subscription. The cursor is the highest id queued under this generation.
#[derive(Debug)]
pub struct Subscriber {
    handle: Arc<ConnectionHandle>,
    channels: Vec<String>,
    generation: u64,
    cursor: AtomicU64,
}

impl Subscriber {
    /// Handle of the subscribed connection
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Subscribed channels
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Generation assigned when the entry was created
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Highest notification id queued so far
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Move the cursor forward to `id`
    ///
    /// Returns false if `id` was already covered.
    pub fn advance(&self, id: u64) -> bool {
        self.cursor.fetch_max(id, Ordering::AcqRel) < id
    }
}

/// Channel index of subscribed connections
///
/// Both directions are kept in step: `channels` answers "who listens on X"
/// for fan-out, `subscribers` answers "what does connection N listen on" for
/// replacement and removal.
#[derive(Default)]
pub struct DispatchTable {
    channels: HashMap<String, HashSet<ConnectionId>>,
    subscribers: HashMap<ConnectionId, Subscriber>,
    last_generation: u64,
}

impl DispatchTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the channel set of a connection, starting at `cursor`
    ///
    /// Returns the new entry's generation.
    pub fn replace(
        &mut self,
        handle: Arc<ConnectionHandle>,
        channels: Vec<String>,
        cursor: u64,
    ) -> u64 {
        let id = handle.id();
        self.remove(id);

        for channel in &channels {
            self.channels.entry(channel.clone()).or_default().insert(id);
        }

        self.last_generation += 1;
        let generation = self.last_generation;
        self.subscribers.insert(
            id,
            Subscriber {
                handle,
                channels,
                generation,
                cursor: AtomicU64::new(cursor),
            },
        );
        generation
    }

    /// Remove a connection from every channel
    ///
    /// Returns false if it had no subscription.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        let Some(subscriber) = self.subscribers.remove(&id) else {
            return false;
        };

        for channel in &subscriber.channels {
            if let Some(ids) = self.channels.get_mut(channel) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.channels.remove(channel);
                }
            }
        }
        true
    }

    /// Entry of a connection
    pub fn get(&self, id: ConnectionId) -> Option<&Subscriber> {
        self.subscribers.get(&id)
    }

    /// Entries subscribed to `channel`
    pub fn subscribers_of(&self, channel: &str) -> Vec<&Subscriber> {
        let Some(ids) = self.channels.get(channel) else {
            return Vec::new();
        };

        ids.iter().filter_map(|id| self.subscribers.get(id)).collect()
    }

    /// Every entry in the table
    pub fn subscribers(&self) -> impl Iterator<Item = &Subscriber> {
        self.subscribers.values()
    }

    /// Channels a connection is subscribed to
    pub fn channels_of(&self, id: ConnectionId) -> Option<&[String]> {
        self.subscribers.get(&id).map(|s| s.channels.as_slice())
    }

    /// Number of channels with at least one subscriber
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of subscribed connections
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
