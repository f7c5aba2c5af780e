//! In-memory notification store
//!
//! Keeps a bounded, time-limited backlog of notifications for resubscribing
//! clients and announces every new notification on a broadcast channel that
//! the dispatcher relays to subscribers.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::Result;

use super::config::BacklogConfig;
use super::notification::Notification;
use super::NotificationStore;

struct Backlog {
    next_id: u64,
    entries: VecDeque<Arc<Notification>>,
}

/// Bounded in-memory notification backlog with a change signal
pub struct MemoryNotificationStore {
    backlog: Mutex<Backlog>,
    changes: broadcast::Sender<Arc<Notification>>,
    config: BacklogConfig,
}

impl MemoryNotificationStore {
    /// Create a store with default configuration
    pub fn new() -> Self {
        Self::with_config(BacklogConfig::default())
    }

    /// Create a store with custom configuration
    pub fn with_config(config: BacklogConfig) -> Self {
        let (changes, _) = broadcast::channel(config.change_capacity);
        Self {
            backlog: Mutex::new(Backlog {
                next_id: 1,
                entries: VecDeque::new(),
            }),
            changes,
            config,
        }
    }

    /// Get the store configuration
    pub fn config(&self) -> &BacklogConfig {
        &self.config
    }

    /// Receiver for the change signal, one item per stored notification
    pub fn subscribe_changes(&self) -> broadcast::Receiver<Arc<Notification>> {
        self.changes.subscribe()
    }

    /// Store one notification and announce it
    pub fn send_one(
        &self,
        channel: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Arc<Notification> {
        let mut stored = self.send_many([(channel.into(), kind.into(), payload)]);
        // send_many returns exactly one entry per input
        stored.remove(0)
    }

    /// Store several notifications and announce each of them
    ///
    /// Ids are assigned in iteration order and announced in id order.
    pub fn send_many<I>(&self, notifications: I) -> Vec<Arc<Notification>>
    where
        I: IntoIterator<Item = (String, String, serde_json::Value)>,
    {
        let mut backlog = self.backlog.lock();
        let mut stored = Vec::new();

        for (channel, kind, payload) in notifications {
            let id = backlog.next_id;
            backlog.next_id += 1;

            let notification = Arc::new(Notification::new(id, channel, kind, payload));
            backlog.entries.push_back(Arc::clone(&notification));
            if backlog.entries.len() > self.config.capacity {
                backlog.entries.pop_front();
            }

            // Signal while holding the lock so receivers observe id order.
            // An error only means nobody is listening.
            let _ = self.changes.send(Arc::clone(&notification));

            tracing::trace!(id = id, channel = %notification.channel, "Notification stored");
            stored.push(notification);
        }

        stored
    }

    /// Drop notifications older than the retention period
    ///
    /// Returns the number of removed notifications.
    pub fn gc(&self) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(self.config.retention) else {
            return 0;
        };

        let mut backlog = self.backlog.lock();
        let before = backlog.entries.len();
        while backlog
            .entries
            .front()
            .is_some_and(|n| n.created_at < cutoff)
        {
            backlog.entries.pop_front();
        }
        let removed = before - backlog.entries.len();

        if removed > 0 {
            tracing::debug!(removed = removed, "Notification backlog collected");
        }
        removed
    }

    /// Spawn the periodic garbage collection task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_gc_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        let interval = store.config.gc_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.gc();
            }
        })
    }

    /// Number of retained notifications
    pub fn len(&self) -> usize {
        self.backlog.lock().entries.len()
    }

    /// Whether the backlog is empty
    pub fn is_empty(&self) -> bool {
        self.backlog.lock().entries.is_empty()
    }

    /// Id of the most recent notification, 0 if none was ever stored
    pub fn latest_id(&self) -> u64 {
        self.backlog.lock().next_id - 1
    }
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn read_since(&self, channels: &[String], cursor: u64) -> Result<Vec<Arc<Notification>>> {
        let window_start = if cursor == 0 {
            Instant::now().checked_sub(self.config.window)
        } else {
            None
        };

        let backlog = self.backlog.lock();
        let notifications = backlog
            .entries
            .iter()
            .filter(|n| match window_start {
                Some(start) => n.created_at > start,
                None => n.id > cursor,
            })
            .filter(|n| channels.iter().any(|c| *c == n.channel))
            .cloned()
            .collect();

        Ok(notifications)
    }
}
