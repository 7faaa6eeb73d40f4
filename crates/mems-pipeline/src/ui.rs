//! UI Transport Sink
//!
//! Best-effort delivery: a full UI queue drops the message instead of
//! holding up the pipeline.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// How the UI is shown; the pipeline only cares whether there is one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// External web browser
    #[default]
    Browser,
    /// Embedded webview window
    WebView,
    /// No UI attached
    Headless,
}

/// Kind of payload carried in a [`UiMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiAction {
    /// ECU connected and initialised
    Connection,
    /// Decoded snapshot
    Data,
    /// Hex response to an ad-hoc command
    EcuResponse,
    /// Link status change
    Status,
}

/// Message to the UI; `data` is JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiMessage {
    pub action: UiAction,
    pub data: String,
}

/// Outcome of a delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped,
}

/// Sending half of the UI queue
#[derive(Debug, Clone)]
pub struct UiSink {
    tx: mpsc::Sender<UiMessage>,
}

impl UiSink {
    pub fn new(tx: mpsc::Sender<UiMessage>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiver the UI transport reads from
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<UiMessage>) {
        let (tx, rx) = mpsc::channel(depth);
        (Self::new(tx), rx)
    }

    /// Never waits
    pub fn try_send(&self, message: UiMessage) -> Delivery {
        match self.tx.try_send(message) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(message)) => {
                debug!("UI queue full, dropping {:?} message", message.action);
                metrics::counter!("mems_ui_dropped_total").increment(1);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Dropped,
        }
    }
}
