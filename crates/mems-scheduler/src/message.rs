//! Messages from the polling loop to its consumers

use mems_protocol::{Command, EcuId, MemsError, SensorSnapshot};
use serde::{Deserialize, Serialize};

/// Everything the polling loop hands across the task boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EcuMessage {
    /// An initialised connection is being polled
    EpochStarted { ecu_id: EcuId, emulated: bool },
    /// One decoded poll cycle
    Snapshot(Box<SensorSnapshot>),
    /// Response to a non-dataframe command, hex encoded
    Response { command: Command, hex: String },
    /// Link or loop status change
    Status(LinkStatus),
    /// The connection epoch is over, no more snapshots will follow
    EpochEnded,
}

/// Status surface for the UI and logs.
///
/// Routine decode skips and link failures are separate variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail")]
pub enum LinkStatus {
    /// A cycle was dropped because a frame could not be decoded
    DecodeSkipped(String),
    /// An ad-hoc command was rejected before reaching the link
    CommandRejected(String),
    /// Read/write failure or timeout; the connection is gone
    LinkLost(String),
    /// The ECU stopped echoing commands; the connection is gone
    Desynchronized(String),
    Paused,
    Resumed,
}

impl LinkStatus {
    /// Status to report for an error
    pub fn from_error(err: &MemsError) -> Self {
        if err.is_desync() {
            LinkStatus::Desynchronized(err.to_string())
        } else if err.is_link_fatal() {
            LinkStatus::LinkLost(err.to_string())
        } else if err.is_decode_error() {
            LinkStatus::DecodeSkipped(err.to_string())
        } else {
            LinkStatus::CommandRejected(err.to_string())
        }
    }

    /// True when the status means the connection epoch has ended
    pub fn is_link_failure(&self) -> bool {
        matches!(self, LinkStatus::LinkLost(_) | LinkStatus::Desynchronized(_))
    }
}
