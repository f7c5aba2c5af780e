//! Registry of live connections
//!
//! Every open connection registers a [`ConnectionHandle`] here and removes it
//! when its lifecycle ends, so the count always equals the number of
//! connections between open and close. Shutdown walks the registry to ask
//! every connection to close and then waits for it to drain.
//!
//! ```text
//!                 Arc<ConnectionRegistry>
//!             ┌──────────────────────────────┐
//!             │ connections: HashMap<Id,     │
//!             │   Arc<ConnectionHandle> {    │
//!             │     outbound: mpsc::Tx,      │
//!             │     close_tx: watch::Tx,     │
//!             │   }                          │
//!             │ >                            │
//!             └──────────────┬───────────────┘
//!                            │
//!        ┌───────────────────┼───────────────────┐
//!        ▼                   ▼                   ▼
//!   [Connection]        [Connection]        [Connection]
//!   mailbox.recv()      mailbox.recv()      mailbox.recv()
//! ```

pub mod handle;
pub mod store;

pub use handle::{Batch, ConnectionHandle, ConnectionId, DeliveryError, Mailbox};
pub use store::ConnectionRegistry;
