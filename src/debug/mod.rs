//! Runtime observability: stats counters and the debug HTTP server.

mod server;
mod stats;

pub use server::{start, ConfigServer};
pub use stats::{Counter, Stats, StatsSnapshot};
