//! Shared server state
//!
//! One [`Hub`] is shared by every connection task. It bundles the dispatcher,
//! the connection registry, the lifecycle hooks and the liveness tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthStore;
use crate::dispatch::Dispatcher;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::stats::ServerStats;
use crate::store::{Notification, NotificationStore};

use super::hooks::LifecycleHooks;

/// Structures shared by all connections
pub struct Hub {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ConnectionRegistry>,
    hooks: Arc<LifecycleHooks>,
    auth: Arc<dyn AuthStore>,
    stats: Arc<ServerStats>,
    tick_tx: watch::Sender<u64>,
    next_connection_id: AtomicU64,
    cancel: CancellationToken,
}

impl Hub {
    /// Create a hub over the given session and notification stores
    pub fn new(auth: Arc<dyn AuthStore>, store: Arc<dyn NotificationStore>) -> Self {
        let stats = Arc::new(ServerStats::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&auth),
            store,
            Arc::clone(&stats),
        ));
        let (tick_tx, _) = watch::channel(0);

        Self {
            dispatcher,
            registry: Arc::new(ConnectionRegistry::new()),
            hooks: Arc::new(LifecycleHooks::new()),
            auth,
            stats,
            tick_tx,
            next_connection_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn hooks(&self) -> &Arc<LifecycleHooks> {
        &self.hooks
    }

    pub fn auth(&self) -> &Arc<dyn AuthStore> {
        &self.auth
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Allocate a connection id
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Receiver of the shared liveness tick
    pub fn ticks(&self) -> watch::Receiver<u64> {
        self.tick_tx.subscribe()
    }

    /// Advance the liveness tick by hand
    ///
    /// [`Hub::spawn_ticker`] calls this periodically.
    pub fn tick(&self) {
        self.tick_tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Spawn the task that drives the liveness tick
    pub fn spawn_ticker(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => hub.tick(),
                }
            }
        })
    }

    /// Spawn the task that publishes store changes to subscribers
    pub fn spawn_relay(
        &self,
        changes: broadcast::Receiver<Arc<Notification>>,
    ) -> tokio::task::JoinHandle<()> {
        self.dispatcher.spawn_relay(changes, self.cancel.child_token())
    }

    /// Stop the background tasks spawned through this hub
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether [`Hub::shutdown`] was called
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
