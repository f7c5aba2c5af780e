//! Notification server
//!
//! The [`NotifyServer`] accepts sockets and hands each upgraded stream to a
//! [`Connection`] task. All connections share one [`Hub`].

pub mod config;
pub mod connection;
pub mod hooks;
pub mod hub;
pub mod listener;

pub use config::ServerConfig;
pub use connection::Connection;
pub use hooks::{HookError, HookEvent, HookHandler, HookId, LifecycleHooks};
pub use hub::Hub;
pub use listener::{NotifyServer, Upgrader};
