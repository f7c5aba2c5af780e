//! wsbus: a WebSocket notification bus transport
//!
//! Keeps many long-lived WebSocket connections open, fans out notifications
//! published on a backend bus to the connections subscribed to their channels,
//! and enforces liveness with an application-level ping/close protocol.
//!
//! # Architecture
//!
//! ```text
//!   Upgrader ──► Connection task ──► Hub { registry, dispatcher, hooks, ticks }
//!                    ▲   │                         │
//!     outbound queue │   └── subscribe ───────────►│ DispatchTable
//!                    │                             │
//!                    └──────── publish ◄─── NotificationStore change signal
//! ```
//!
//! The HTTP upgrade handshake, the session store and the notification storage
//! are external collaborators reached through the [`server::Upgrader`],
//! [`auth::AuthStore`] and [`store::NotificationStore`] traits.

pub mod auth;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;

pub use auth::{AuthContext, AuthStore, MemorySessionStore};
pub use dispatch::{Dispatcher, PublishReport, Subscribed};
pub use error::{Error, ProtocolError, Result};
pub use protocol::{CloseCode, Frame, Opcode};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use server::{Connection, HookEvent, Hub, LifecycleHooks, NotifyServer, ServerConfig, Upgrader};
pub use session::{TimeoutManager, TimeoutReason};
pub use store::{MemoryNotificationStore, Notification, NotificationStore};
