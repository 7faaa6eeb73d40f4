//! MEMS Distribution Pipeline
//!
//! Receives decoded snapshots and link events from the polling loop, writes
//! snapshots to a per-connection log file and forwards everything to the UI.

mod logger;
mod pipeline;
mod ui;

pub use logger::{DataLogger, LogError};
pub use pipeline::{DistributionPipeline, PipelineConfig, PipelineStats};
pub use ui::{Delivery, DisplayMode, UiAction, UiMessage, UiSink};
