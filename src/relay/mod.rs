//! Room broadcast engine

mod engine;
mod stats;

pub use engine::{BroadcastReport, Relay};
pub use stats::{RelayStats, RelayStatsSnapshot};
