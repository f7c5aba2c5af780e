//! Connection and server statistics

pub mod metrics;

pub use metrics::{ConnectionStats, ServerStats, StatsSnapshot};
