//! Notification storage seam
//!
//! The transport does not own notification storage. It reads the backlog
//! through [`NotificationStore`] when a client subscribes, and receives new
//! notifications through the store's change signal.
//! [`MemoryNotificationStore`] is a bounded in-memory implementation.

pub mod config;
pub mod memory;
pub mod notification;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub use config::BacklogConfig;
pub use memory::MemoryNotificationStore;
pub use notification::Notification;

/// Read access to stored notifications
#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    /// Notifications on any of `channels` newer than `cursor`, in id order
    ///
    /// A cursor of 0 means "no history": implementations return a recent
    /// window rather than everything they hold.
    async fn read_since(&self, channels: &[String], cursor: u64) -> Result<Vec<Arc<Notification>>>;
}
