//! Backlog configuration

use std::time::Duration;

use crate::protocol::constants::DEFAULT_BACKLOG_WINDOW;

/// Configuration of the in-memory notification backlog
#[derive(Debug, Clone)]
pub struct BacklogConfig {
    /// Recent notifications replayed to a subscriber with cursor 0
    pub window: Duration,

    /// Age after which notifications are garbage collected
    pub retention: Duration,

    /// Maximum number of retained notifications (oldest dropped first)
    pub capacity: usize,

    /// Capacity of the change signal channel
    pub change_capacity: usize,

    /// Interval of the garbage collection task
    pub gc_interval: Duration,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_BACKLOG_WINDOW,
            retention: DEFAULT_BACKLOG_WINDOW * 2,
            capacity: 10_000,
            change_capacity: 1024,
            gc_interval: Duration::from_secs(60),
        }
    }
}

impl BacklogConfig {
    /// Set the replay window for cursor 0
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the retention period
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the maximum number of retained notifications
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the capacity of the change signal channel
    pub fn change_capacity(mut self, capacity: usize) -> Self {
        self.change_capacity = capacity.max(1);
        self
    }

    /// Set the garbage collection interval
    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }
}
