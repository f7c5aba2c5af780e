//! Notification server listener
//!
//! Handles the TCP accept loop, delegates the HTTP upgrade to an
//! [`Upgrader`] and spawns one task per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::auth::{AuthContext, AuthStore};
use crate::error::{Error, Result};
use crate::protocol::CloseCode;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::hub::Hub;
use crate::store::NotificationStore;

/// Performs the upgrade handshake on an accepted socket
///
/// Returns the stream frames are exchanged on and the authorization context
/// resolved from the request (e.g. its session cookie).
#[async_trait]
pub trait Upgrader: Send + Sync + 'static {
    /// Upgraded stream type
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn upgrade(
        &self,
        socket: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(Self::Stream, AuthContext)>;
}

/// Notification server
pub struct NotifyServer<U: Upgrader> {
    config: ServerConfig,
    upgrader: Arc<U>,
    hub: Arc<Hub>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<U: Upgrader> NotifyServer<U> {
    /// Create a server over the given stores
    ///
    /// Fails if the configuration does not validate.
    pub fn new(
        config: ServerConfig,
        upgrader: U,
        auth: Arc<dyn AuthStore>,
        store: Arc<dyn NotificationStore>,
    ) -> Result<Self> {
        Self::with_hub(config, upgrader, Arc::new(Hub::new(auth, store)))
    }

    /// Create a server sharing an existing hub
    pub fn with_hub(config: ServerConfig, upgrader: U, hub: Arc<Hub>) -> Result<Self> {
        config.validate()?;

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Ok(Self {
            config,
            upgrader: Arc::new(upgrader),
            hub,
            connection_semaphore,
        })
    }

    /// Get a reference to the shared hub
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` resolves, every connection is asked to close with
    /// `GoingAway` and the call waits up to `shutdown_grace` for them.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "Notification server listening");

        let ticker = self.hub.spawn_ticker(self.config.tick_interval);

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        drop(listener);
        self.drain().await;

        self.hub.shutdown();
        let _ = ticker.await;

        result
    }

    async fn drain(&self) {
        let registry = self.hub.registry();
        if registry.is_empty() {
            return;
        }

        registry.close_all(CloseCode::GoingAway);
        let drained =
            tokio::time::timeout(self.config.shutdown_grace, registry.wait_until_empty()).await;

        if drained.is_err() {
            tracing::warn!(
                remaining = registry.len(),
                "Shutdown grace period elapsed with connections still open"
            );
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let config = self.config.clone();
        let upgrader = Arc::clone(&self.upgrader);
        let hub = Arc::clone(&self.hub);

        tokio::spawn(async move {
            let _permit = permit;

            let upgraded = tokio::time::timeout(
                config.handshake_timeout,
                upgrader.upgrade(socket, peer_addr),
            )
            .await
            .map_err(|_| Error::Handshake("timed out".into()))
            .and_then(|r| r);

            let (stream, auth) = match upgraded {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    tracing::debug!(peer = %peer_addr, error = %e, "Upgrade failed");
                    return;
                }
            };

            let connection = Connection::new(hub, stream, peer_addr, auth, &config);
            let connection_id = connection.context().connection_id;

            if let Err(e) = connection.run().await {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %e,
                    "Connection error"
                );
            }
        });
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
