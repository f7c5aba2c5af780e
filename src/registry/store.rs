//! Connection registry implementation

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::protocol::CloseCode;

use super::handle::{ConnectionHandle, ConnectionId};

/// Set of currently open connections
///
/// Lock sections never await, so a blocking `RwLock` is enough.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,

    /// Woken whenever the registry becomes empty
    drained: Notify,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            drained: Notify::new(),
        }
    }

    /// Add an open connection
    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        let id = handle.id();
        let mut connections = self.connections.write();
        connections.insert(id, handle);

        tracing::debug!(connection_id = %id, active = connections.len(), "Connection registered");
    }

    /// Remove a connection
    ///
    /// Returns false if it was not registered.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let removed = connections.remove(&id).is_some();

        if removed {
            tracing::debug!(connection_id = %id, active = connections.len(), "Connection deregistered");
            if connections.is_empty() {
                self.drained.notify_waiters();
            }
        }
        removed
    }

    /// Look up a connection
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().get(&id).cloned()
    }

    /// Number of open connections
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is open
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Snapshot of all handles
    pub fn handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.read().values().cloned().collect()
    }

    /// Ask every open connection to close with `code`
    ///
    /// Returns the number of connections that had no earlier close request.
    pub fn close_all(&self, code: CloseCode) -> usize {
        let handles = self.handles();
        let requested = handles.iter().filter(|h| h.request_close(code)).count();

        tracing::info!(code = %code, connections = handles.len(), "Closing all connections");
        requested
    }

    /// Wait until every connection has deregistered
    pub async fn wait_until_empty(&self) {
        loop {
            // Created before the check so a concurrent deregister is not missed
            let drained = self.drained.notified();
            if self.is_empty() {
                return;
            }
            drained.await;
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    use crate::auth::AuthContext;
    use crate::registry::Mailbox;

    use super::*;

    fn handle(id: u64) -> (Arc<ConnectionHandle>, Mailbox) {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000 + id as u16);
        ConnectionHandle::new(ConnectionId(id), addr, AuthContext::anonymous("s"), 8)
    }

    #[test]
    fn test_register_deregister() {
        let registry = ConnectionRegistry::new();
        let (a, _ma) = handle(1);
        let (b, _mb) = handle(2);

        registry.register(a);
        registry.register(b);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(ConnectionId(1)).is_some());

        assert!(registry.deregister(ConnectionId(1)));
        assert!(!registry.deregister(ConnectionId(1)));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(ConnectionId(1)).is_none());
    }

    #[tokio::test]
    async fn test_close_all_requests_each_once() {
        let registry = ConnectionRegistry::new();
        let (a, mut ma) = handle(1);
        let (b, _mb) = handle(2);
        b.request_close(CloseCode::SessionExpired);

        registry.register(a);
        registry.register(b.clone());

        assert_eq!(registry.close_all(CloseCode::GoingAway), 1);
        ma.close_requests.changed().await.unwrap();
        assert_eq!(*ma.close_requests.borrow(), Some(CloseCode::GoingAway));
        assert_eq!(b.requested_close(), Some(CloseCode::SessionExpired));
    }

    #[tokio::test]
    async fn test_wait_until_empty() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, _ma) = handle(1);
        registry.register(a);

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_until_empty().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.deregister(ConnectionId(1));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_empty_returns_immediately() {
        let registry = ConnectionRegistry::new();
        registry.wait_until_empty().await;
    }
}
