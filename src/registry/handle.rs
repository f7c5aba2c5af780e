//! Non-owning connection handles
//!
//! A [`ConnectionHandle`] is what the registry and the dispatcher hold for a
//! connection: the sending side of its bounded outbound queue and of its
//! close-request channel. Dropping every handle does not stop the connection,
//! and holding one does not keep the connection task alive.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::auth::AuthContext;
use crate::protocol::CloseCode;
use crate::store::Notification;

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notifications queued for one connection in a single push
#[derive(Debug, Clone)]
pub struct Batch {
    /// Subscription generation the batch was queued under
    pub generation: u64,
    /// Notifications in id order
    pub notifications: Vec<Arc<Notification>>,
}

impl Batch {
    /// Create a batch for `generation`
    pub fn new(generation: u64, notifications: Vec<Arc<Notification>>) -> Self {
        Self {
            generation,
            notifications,
        }
    }

    /// Number of notifications in the batch
    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    /// Whether the batch carries no notification
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

/// Why a batch could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The outbound queue is at capacity
    #[error("outbound queue full")]
    Full,
    /// The connection stopped accepting batches
    #[error("connection closed")]
    Closed,
}

/// Receiving side owned by the connection task
#[derive(Debug)]
pub struct Mailbox {
    /// Batches pushed by the dispatcher
    pub outbound: mpsc::Receiver<Batch>,
    /// First close request wins; later requests are ignored
    pub close_requests: watch::Receiver<Option<CloseCode>>,
}

/// Handle to a live connection
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer_addr: SocketAddr,
    auth: AuthContext,
    outbound: mpsc::Sender<Batch>,
    close_tx: watch::Sender<Option<CloseCode>>,
    closing: AtomicBool,
}

impl ConnectionHandle {
    /// Create a handle and the mailbox its connection reads from
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        auth: AuthContext,
        queue_capacity: usize,
    ) -> (Arc<Self>, Mailbox) {
        let (outbound, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        let (close_tx, close_rx) = watch::channel(None);

        let handle = Arc::new(Self {
            id,
            peer_addr,
            auth,
            outbound,
            close_tx,
            closing: AtomicBool::new(false),
        });
        let mailbox = Mailbox {
            outbound: outbound_rx,
            close_requests: close_rx,
        };

        (handle, mailbox)
    }

    /// Connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Authorization context the connection was opened with
    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Queue a batch without waiting
    pub fn deliver(&self, batch: Batch) -> Result<(), DeliveryError> {
        self.outbound.try_send(batch).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the connection to close with `code`
    ///
    /// Returns true if this was the first request.
    pub fn request_close(&self, code: CloseCode) -> bool {
        self.close_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(code);
                true
            } else {
                false
            }
        })
    }

    /// Close code requested so far, if any
    pub fn requested_close(&self) -> Option<CloseCode> {
        *self.close_tx.borrow()
    }

    /// Flag the connection as closing so fan-out skips it
    pub fn mark_closing(&self) {
        self.closing.store(true, Ordering::Release);
    }

    /// Whether the connection has started closing
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use serde_json::Value;

    use super::*;

    fn handle(capacity: usize) -> (Arc<ConnectionHandle>, Mailbox) {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8072);
        ConnectionHandle::new(ConnectionId(1), addr, AuthContext::anonymous("s"), capacity)
    }

    fn batch(id: u64) -> Batch {
        Batch::new(1, vec![Arc::new(Notification::new(id, "a", "t", Value::Null))])
    }

    #[tokio::test]
    async fn test_deliver_until_full() {
        let (handle, mut mailbox) = handle(1);

        assert_eq!(handle.deliver(batch(1)), Ok(()));
        assert_eq!(handle.deliver(batch(2)), Err(DeliveryError::Full));

        let received = mailbox.outbound.recv().await.unwrap();
        assert_eq!(received.notifications[0].id, 1);
        assert_eq!(handle.deliver(batch(3)), Ok(()));
    }

    #[test]
    fn test_deliver_after_mailbox_dropped() {
        let (handle, mailbox) = handle(4);
        drop(mailbox);

        assert_eq!(handle.deliver(batch(1)), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_first_close_request_wins() {
        let (handle, mut mailbox) = handle(1);

        assert!(handle.request_close(CloseCode::SessionExpired));
        assert!(!handle.request_close(CloseCode::ResourceExhausted));

        mailbox.close_requests.changed().await.unwrap();
        assert_eq!(*mailbox.close_requests.borrow(), Some(CloseCode::SessionExpired));
        assert_eq!(handle.requested_close(), Some(CloseCode::SessionExpired));
    }

    #[test]
    fn test_closing_flag() {
        let (handle, _mailbox) = handle(1);

        assert!(!handle.is_closing());
        handle.mark_closing();
        assert!(handle.is_closing());
        assert_eq!(handle.id().to_string(), "1");
    }
}
