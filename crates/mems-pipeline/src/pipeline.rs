//! Distribution Pipeline
//!
//! Consumes [`EcuMessage`]s from the polling loop and fans them out to the
//! data logger and the UI sink.

use crate::logger::DataLogger;
use crate::ui::{Delivery, DisplayMode, UiAction, UiMessage, UiSink};
use mems_protocol::{EcuId, SensorSnapshot};
use mems_scheduler::EcuMessage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Flags the pipeline reads from the connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Write snapshots to a log file
    pub logging_enabled: bool,
    /// Directory for log files
    pub log_folder: PathBuf,
    /// UI display mode
    pub display: DisplayMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            logging_enabled: true,
            log_folder: PathBuf::from("logs"),
            display: DisplayMode::default(),
        }
    }
}

/// Counters returned when the pipeline finishes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub logged: u64,
    pub log_sessions: u64,
    pub ui_delivered: u64,
    pub ui_dropped: u64,
    pub responses: u64,
}

#[derive(Debug, Clone, Copy)]
struct Epoch {
    ecu_id: EcuId,
    emulated: bool,
}

#[derive(Serialize)]
struct ConnectionInfo {
    ecu_id: String,
    emulated: bool,
}

/// Fans ECU messages out to the logger and the UI
pub struct DistributionPipeline {
    config: PipelineConfig,
    ui: UiSink,
    epoch: Option<Epoch>,
    logger: Option<DataLogger>,
    /// Set after a log open/write failure; cleared when the epoch ends
    log_failed: bool,
    stats: PipelineStats,
}

impl DistributionPipeline {
    pub fn new(config: PipelineConfig, ui: UiSink) -> Self {
        info!(
            "Creating pipeline (logging: {}, display: {:?})",
            config.logging_enabled, config.display
        );
        Self {
            config,
            ui,
            epoch: None,
            logger: None,
            log_failed: false,
            stats: PipelineStats::default(),
        }
    }

    /// Run on a blocking task; log appends are plain file writes
    pub fn spawn(self, rx: mpsc::Receiver<EcuMessage>) -> JoinHandle<PipelineStats> {
        tokio::task::spawn_blocking(move || self.run(rx))
    }

    /// Consume until every sender is gone
    pub fn run(mut self, mut rx: mpsc::Receiver<EcuMessage>) -> PipelineStats {
        while let Some(message) = rx.blocking_recv() {
            self.handle(message);
        }
        self.end_epoch();
        info!(
            "Pipeline finished: {} logged, {} to UI, {} dropped",
            self.stats.logged, self.stats.ui_delivered, self.stats.ui_dropped
        );
        self.stats
    }

    /// Route one message
    pub fn handle(&mut self, message: EcuMessage) {
        match message {
            EcuMessage::EpochStarted { ecu_id, emulated } => {
                self.end_epoch();
                self.epoch = Some(Epoch { ecu_id, emulated });
                let info = ConnectionInfo {
                    ecu_id: ecu_id.to_string(),
                    emulated,
                };
                self.deliver(UiAction::Connection, &info);
            }
            EcuMessage::Snapshot(snapshot) => {
                self.log(&snapshot);
                self.deliver(UiAction::Data, &*snapshot);
            }
            EcuMessage::Response { command, hex } => {
                info!("ECU response to {:?}: {}", command, hex);
                self.stats.responses += 1;
                self.deliver(UiAction::EcuResponse, &hex);
            }
            EcuMessage::Status(status) => {
                if status.is_link_failure() {
                    error!("ECU link failure: {:?}", status);
                }
                self.deliver(UiAction::Status, &status);
            }
            EcuMessage::EpochEnded => self.end_epoch(),
        }
    }

    /// True while snapshots should be written to file
    pub fn logging_active(&self) -> bool {
        self.config.logging_enabled && matches!(self.epoch, Some(epoch) if !epoch.emulated)
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    fn log(&mut self, snapshot: &SensorSnapshot) {
        if !self.logging_active() || self.log_failed {
            return;
        }

        if self.logger.is_none() {
            let Some(epoch) = self.epoch else {
                return;
            };
            let prefix = epoch.ecu_id.log_prefix();
            info!("Opening log file with prefix {}", prefix);
            match DataLogger::open(&self.config.log_folder, &prefix) {
                Ok(logger) => {
                    self.logger = Some(logger);
                    self.stats.log_sessions += 1;
                }
                Err(e) => {
                    error!("Data logging disabled for this connection: {}", e);
                    self.log_failed = true;
                    return;
                }
            }
        }

        if let Some(logger) = self.logger.as_mut() {
            match logger.append(snapshot) {
                Ok(()) => {
                    self.stats.logged += 1;
                    metrics::counter!("mems_snapshots_logged_total").increment(1);
                }
                Err(e) => {
                    error!("Data logging disabled for this connection: {}", e);
                    self.logger = None;
                    self.log_failed = true;
                }
            }
        }
    }

    fn end_epoch(&mut self) {
        if let Some(logger) = self.logger.take() {
            if let Err(e) = logger.close() {
                warn!("Failed to close log file: {}", e);
            }
        }
        self.epoch = None;
        self.log_failed = false;
    }

    fn deliver<T: Serialize + ?Sized>(&mut self, action: UiAction, payload: &T) {
        if self.config.display == DisplayMode::Headless {
            return;
        }

        let data = match serde_json::to_string(payload) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to serialise {:?} message: {}", action, e);
                return;
            }
        };

        match self.ui.try_send(UiMessage { action, data }) {
            Delivery::Delivered => self.stats.ui_delivered += 1,
            Delivery::Dropped => self.stats.ui_dropped += 1,
        }
    }
}
