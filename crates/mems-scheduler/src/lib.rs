//! MEMS Dataframe Scheduler
//!
//! Owns the ECU session on a single task, polls dataframes 0x80 and 0x7D at
//! a fixed interval and hands decoded snapshots to the pipeline over a
//! bounded channel.

mod message;
mod poller;

pub use message::{EcuMessage, LinkStatus};
pub use poller::{PollerConfig, PollerControl, PollerState, PollerStats, PollingLoop};
