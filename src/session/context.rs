//! Hook context
//!
//! Read-only snapshot of a connection passed to lifecycle hooks.

use std::net::SocketAddr;

use crate::auth::AuthContext;
use crate::protocol::CloseCode;
use crate::registry::ConnectionId;

/// Context passed to lifecycle hook handlers
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Unique connection ID
    pub connection_id: ConnectionId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Authorization context resolved during the upgrade
    pub auth: AuthContext,

    /// Close code, set for close hooks
    pub close_code: Option<CloseCode>,
}

impl ConnectionContext {
    /// Create a new context
    pub fn new(connection_id: ConnectionId, peer_addr: SocketAddr, auth: AuthContext) -> Self {
        Self {
            connection_id,
            peer_addr,
            auth,
            close_code: None,
        }
    }

    /// Session the connection authenticated with
    pub fn session_id(&self) -> &str {
        &self.auth.session_id
    }
}
