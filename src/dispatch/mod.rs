//! Channel dispatch
//!
//! Maps channels to subscribing connections and fans published notifications
//! out to their outbound queues. Fan-out never waits on a subscriber: a full
//! queue closes that one connection with `ResourceExhausted`.

pub mod engine;
pub mod table;

pub use engine::{Dispatcher, PublishReport, Subscribed};
pub use table::{DispatchTable, Subscriber};
