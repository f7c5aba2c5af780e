//! Dispatch engine
//!
//! Owns the [`DispatchTable`] and turns published notifications into pushes
//! onto subscriber queues.

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthStore;
use crate::error::{Error, Result};
use crate::protocol::CloseCode;
use crate::registry::{Batch, ConnectionHandle, ConnectionId, DeliveryError};
use crate::stats::ServerStats;
use crate::store::{Notification, NotificationStore};

use super::table::{DispatchTable, Subscriber};

/// Outcome of a single publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers the notification was queued to
    pub delivered: usize,
    /// Subscribers asked to close because their session is gone
    pub expired: usize,
    /// Subscribers asked to close because their queue was full
    pub overflowed: usize,
}

/// Outcome of a successful subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscribed {
    /// Generation carried by every batch queued for this subscription
    pub generation: u64,
    /// Backlog notifications queued
    pub backlog: usize,
}

/// Fans notifications out to subscribed connections
///
/// Publishes hold the table's read guard for the whole fan-out and
/// subscriptions take the write guard, so a subscribe never interleaves with
/// a publish that is halfway through its subscribers.
pub struct Dispatcher {
    table: RwLock<DispatchTable>,
    auth: Arc<dyn AuthStore>,
    store: Arc<dyn NotificationStore>,
    stats: Arc<ServerStats>,
}

impl Dispatcher {
    /// Create a dispatcher backed by the given stores
    pub fn new(
        auth: Arc<dyn AuthStore>,
        store: Arc<dyn NotificationStore>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            table: RwLock::new(DispatchTable::new()),
            auth,
            store,
            stats,
        }
    }

    /// Replace a connection's channels and queue its backlog
    ///
    /// Fails with [`Error::AuthorizationStale`] without touching the table if
    /// the connection's session is gone. The table lock is held until the
    /// backlog batch is queued, so a concurrent publish reaches this
    /// connection only after its backlog. Batches queued before the
    /// replacement carry an older generation.
    pub async fn subscribe(
        &self,
        handle: &Arc<ConnectionHandle>,
        channels: Vec<String>,
        cursor: u64,
    ) -> Result<Subscribed> {
        if !self.auth.is_valid(handle.auth()).await {
            return Err(Error::AuthorizationStale);
        }

        let mut table = self.table.write().await;
        let generation = table.replace(Arc::clone(handle), channels.clone(), cursor);

        tracing::debug!(
            connection_id = %handle.id(),
            channels = ?channels,
            cursor = cursor,
            generation = generation,
            "Subscription replaced"
        );

        let mut subscribed = Subscribed {
            generation,
            backlog: 0,
        };
        if channels.is_empty() {
            return Ok(subscribed);
        }

        let mut backlog = self.store.read_since(&channels, cursor).await?;
        backlog.sort_by_key(|n| n.id);
        let Some(last) = backlog.last().map(|n| n.id) else {
            return Ok(subscribed);
        };
        if let Some(entry) = table.get(handle.id()) {
            entry.advance(last);
        }
        let count = backlog.len();

        match handle.deliver(Batch::new(generation, backlog)) {
            Ok(()) => {
                self.stats.record_delivered(count as u64);
                subscribed.backlog = count;
                Ok(subscribed)
            }
            Err(DeliveryError::Full) => {
                drop(table);
                self.overflow(handle);
                Err(Error::ResourceExhausted)
            }
            Err(DeliveryError::Closed) => Ok(subscribed),
        }
    }

    /// Queue a notification to every valid subscriber of its channel
    ///
    /// Subscribers whose cursor already covers the notification, through
    /// their backlog or a resync, are skipped.
    pub async fn publish(&self, notification: Arc<Notification>) -> PublishReport {
        self.stats.record_published();

        let table = self.table.read().await;
        let mut report = PublishReport::default();
        for subscriber in table.subscribers_of(&notification.channel) {
            if subscriber.cursor() >= notification.id {
                continue;
            }
            self.offer(subscriber, vec![Arc::clone(&notification)], &mut report)
                .await;
        }
        drop(table);

        tracing::trace!(
            id = notification.id,
            channel = %notification.channel,
            delivered = report.delivered,
            "Notification dispatched"
        );
        report
    }

    /// Re-read the store for every subscriber from its cursor
    ///
    /// Recovers notifications the change signal dropped: whatever is stored
    /// past a subscriber's cursor is queued to it as one batch.
    pub async fn resync(&self) -> PublishReport {
        let table = self.table.read().await;
        let mut report = PublishReport::default();

        for subscriber in table.subscribers() {
            if subscriber.channels().is_empty() || subscriber.handle().is_closing() {
                continue;
            }

            let cursor = subscriber.cursor();
            let mut missed = match self.store.read_since(subscriber.channels(), cursor).await {
                Ok(missed) => missed,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %subscriber.handle().id(),
                        error = %e,
                        "Backlog read failed during resync"
                    );
                    continue;
                }
            };
            if missed.is_empty() {
                continue;
            }
            missed.sort_by_key(|n| n.id);
            self.offer(subscriber, missed, &mut report).await;
        }

        report
    }

    /// Remove a connection from every channel
    pub async fn unsubscribe_all(&self, id: ConnectionId) -> bool {
        self.table.write().await.remove(id)
    }

    /// Number of subscribed connections
    pub async fn subscriber_count(&self) -> usize {
        self.table.read().await.subscriber_count()
    }

    /// Number of channels with at least one subscriber
    pub async fn channel_count(&self) -> usize {
        self.table.read().await.channel_count()
    }

    /// Spawn a task that publishes everything received on `changes`
    ///
    /// A lagging receiver triggers a [`resync`](Self::resync). The task ends
    /// when `cancel` fires or the sender side is dropped.
    pub fn spawn_relay(
        self: &Arc<Self>,
        mut changes: broadcast::Receiver<Arc<Notification>>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(notification) => {
                            dispatcher.publish(notification).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped = skipped, "Notification relay lagged, resyncing");
                            let report = dispatcher.resync().await;
                            tracing::debug!(
                                delivered = report.delivered,
                                expired = report.expired,
                                overflowed = report.overflowed,
                                "Subscribers resynced"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Notification relay stopped");
        })
    }

    /// Queue `notifications` to one subscriber
    ///
    /// Closing subscribers are skipped, expired ones asked to close.
    async fn offer(
        &self,
        subscriber: &Subscriber,
        notifications: Vec<Arc<Notification>>,
        report: &mut PublishReport,
    ) {
        let handle = subscriber.handle();
        if handle.is_closing() {
            return;
        }

        if !self.auth.is_valid(handle.auth()).await {
            if handle.request_close(CloseCode::SessionExpired) {
                self.stats.record_session_expired();
                tracing::info!(
                    connection_id = %handle.id(),
                    session = %handle.auth().session_id,
                    "Session expired, closing subscriber"
                );
            }
            report.expired += 1;
            return;
        }

        let cursor = subscriber.cursor();
        let fresh: Vec<_> = notifications.into_iter().filter(|n| n.id > cursor).collect();
        let Some(last) = fresh.last().map(|n| n.id) else {
            return;
        };
        subscriber.advance(last);
        let count = fresh.len();

        match handle.deliver(Batch::new(subscriber.generation(), fresh)) {
            Ok(()) => {
                self.stats.record_delivered(count as u64);
                report.delivered += 1;
            }
            Err(DeliveryError::Full) => {
                self.overflow(handle);
                report.overflowed += 1;
            }
            Err(DeliveryError::Closed) => {}
        }
    }

    fn overflow(&self, handle: &ConnectionHandle) {
        if handle.request_close(CloseCode::ResourceExhausted) {
            self.stats.record_overflow();
            tracing::warn!(connection_id = %handle.id(), "Outbound queue full, closing subscriber");
        }
    }
}
