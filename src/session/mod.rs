//! Per-connection session state
//!
//! Everything here is owned and mutated by a single connection task.

pub mod context;
pub mod state;
pub mod subscription;
pub mod timeout;

pub use context::ConnectionContext;
pub use state::{CloseInitiator, ConnectionPhase, ConnectionState};
pub use subscription::Subscription;
pub use timeout::{TimeoutManager, TimeoutReason};
