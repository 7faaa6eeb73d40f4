//! Dataframe Polling Loop

use crate::message::{EcuMessage, LinkStatus};
use chrono::Utc;
use mems_protocol::{Command, DataFrame, MemsError, ProtocolSession, SensorSnapshot};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// The ECU struggles to answer both frames faster than this
const MIN_RELIABLE_INTERVAL_MS: u64 = 450;

/// Configuration for the polling loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Time between dataframe requests (default: 1000 ms)
    pub poll_interval_ms: u64,
    /// Time between heartbeats while paused (default: 2000 ms)
    pub heartbeat_interval_ms: u64,
    /// Longest a message may wait for room in the pipeline channel
    pub send_timeout_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            heartbeat_interval_ms: 2000,
            send_timeout_ms: 250,
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Where the loop is between and during cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Waiting for the next cycle
    Idle,
    /// Requesting both dataframes
    Polling,
    /// Only sending heartbeats
    Paused,
}

/// Requests accepted between cycles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerControl {
    Pause,
    Resume,
    /// Send a command from the table
    Send(Command),
    /// Send raw command bytes, looked up in the table first
    SendRaw(Vec<u8>),
}

/// Counters returned when the loop finishes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub cycles: u64,
    pub snapshots: u64,
    pub skipped: u64,
    pub responses: u64,
}

/// Polls the ECU for dataframes and forwards what it decodes
pub struct PollingLoop {
    config: PollerConfig,
    state: PollerState,
    stats: PollerStats,
    last_heartbeat: Instant,
}

impl PollingLoop {
    pub fn new(config: PollerConfig) -> Self {
        if config.poll_interval_ms < MIN_RELIABLE_INTERVAL_MS {
            warn!(
                "Poll interval {}ms is below {}ms, the ECU may not keep up",
                config.poll_interval_ms, MIN_RELIABLE_INTERVAL_MS
            );
        }

        Self {
            config,
            state: PollerState::Idle,
            stats: PollerStats::default(),
            last_heartbeat: Instant::now(),
        }
    }

    /// Run until `shutdown` flips to true (or its sender goes away), or the link fails.
    ///
    /// The session must be initialised. Shutdown and control requests are
    /// only acted on between cycles, so a command is never separated from its
    /// response.
    pub async fn run(
        &mut self,
        session: &mut ProtocolSession,
        tx: mpsc::Sender<EcuMessage>,
        mut control: mpsc::Receiver<PollerControl>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<PollerStats, MemsError> {
        let ecu_id = match session.ecu_id() {
            Some(id) if session.is_initialized() => id,
            _ => return Err(MemsError::NotConnected),
        };

        info!(
            "Starting dataframe loop for ECU {} every {}ms",
            ecu_id, self.config.poll_interval_ms
        );
        announce(
            &tx,
            EcuMessage::EpochStarted {
                ecu_id,
                emulated: session.is_emulated(),
            },
        )
        .await;

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                Some(request) = control.recv() => {
                    if let Err(e) = self.handle_control(request, session, &tx).await {
                        break Err(e);
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(session, &tx).await {
                        break Err(e);
                    }
                }
            }
        };

        self.state = PollerState::Idle;

        if let Err(e) = &result {
            error!("Dataframe loop stopped: {}", e);
            self.forward(&tx, EcuMessage::Status(LinkStatus::from_error(e)))
                .await;
        }
        announce(&tx, EcuMessage::EpochEnded).await;

        info!(
            "Dataframe loop finished after {} cycles ({} skipped)",
            self.stats.cycles, self.stats.skipped
        );
        result.map(|_| self.stats.clone())
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn stats(&self) -> &PollerStats {
        &self.stats
    }

    async fn tick(
        &mut self,
        session: &mut ProtocolSession,
        tx: &mpsc::Sender<EcuMessage>,
    ) -> Result<(), MemsError> {
        if self.state == PollerState::Paused {
            if self.last_heartbeat.elapsed() >= self.config.heartbeat_interval() {
                self.last_heartbeat = Instant::now();
                self.send(Command::Heartbeat, session, tx).await?;
            }
            return Ok(());
        }

        self.state = PollerState::Polling;
        let frames = read_frames(session).await;
        self.state = PollerState::Idle;

        let (frame80, frame7d) = frames?;
        self.stats.cycles += 1;
        metrics::counter!("mems_poll_cycles_total").increment(1);

        self.process_frames(&frame80, &frame7d, tx).await;
        Ok(())
    }

    /// Decode one cycle's frames and forward the result; a bad frame only costs this cycle
    async fn process_frames(
        &mut self,
        frame80: &[u8],
        frame7d: &[u8],
        tx: &mpsc::Sender<EcuMessage>,
    ) {
        match SensorSnapshot::decode(frame80, frame7d, Utc::now()) {
            Ok(snapshot) => {
                self.stats.snapshots += 1;
                self.forward(tx, EcuMessage::Snapshot(Box::new(snapshot)))
                    .await;
            }
            Err(e) => {
                warn!("Skipping dataframe cycle: {}", e);
                self.stats.skipped += 1;
                metrics::counter!("mems_decode_skipped_total").increment(1);
                self.forward(tx, EcuMessage::Status(LinkStatus::from_error(&e)))
                    .await;
            }
        }
    }

    async fn handle_control(
        &mut self,
        request: PollerControl,
        session: &mut ProtocolSession,
        tx: &mpsc::Sender<EcuMessage>,
    ) -> Result<(), MemsError> {
        debug!("Control request {:?}", request);

        match request {
            PollerControl::Pause => {
                if self.state != PollerState::Paused {
                    info!("Pausing dataframe loop");
                    self.state = PollerState::Paused;
                    self.last_heartbeat = Instant::now();
                    self.forward(tx, EcuMessage::Status(LinkStatus::Paused))
                        .await;
                }
            }
            PollerControl::Resume => {
                if self.state == PollerState::Paused {
                    info!("Resuming dataframe loop");
                    self.state = PollerState::Idle;
                    self.forward(tx, EcuMessage::Status(LinkStatus::Resumed))
                        .await;
                }
            }
            PollerControl::Send(command) => self.send(command, session, tx).await?,
            PollerControl::SendRaw(bytes) => match Command::from_bytes(&bytes) {
                Ok(command) => self.send(command, session, tx).await?,
                Err(e) => {
                    warn!("Rejected command: {}", e);
                    self.forward(tx, EcuMessage::Status(LinkStatus::from_error(&e)))
                        .await;
                }
            },
        }
        Ok(())
    }

    /// One ad-hoc exchange; the response goes out verbatim as hex
    async fn send(
        &mut self,
        command: Command,
        session: &mut ProtocolSession,
        tx: &mpsc::Sender<EcuMessage>,
    ) -> Result<(), MemsError> {
        let exchange = session.send_command(command).await?;
        self.stats.responses += 1;
        self.forward(
            tx,
            EcuMessage::Response {
                command,
                hex: exchange.response_hex(),
            },
        )
        .await;
        Ok(())
    }

    /// Bounded hand-off to the pipeline; a stuck consumer costs at most `send_timeout`
    async fn forward(&self, tx: &mpsc::Sender<EcuMessage>, message: EcuMessage) {
        match tx.send_timeout(message, self.config.send_timeout()).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                warn!("Pipeline busy, dropping message");
                metrics::counter!("mems_pipeline_dropped_total").increment(1);
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!("Pipeline closed, message discarded");
            }
        }
    }
}

/// Epoch markers scope the pipeline's log sessions, so they wait for room
/// instead of being dropped
async fn announce(tx: &mpsc::Sender<EcuMessage>, message: EcuMessage) {
    if tx.send(message).await.is_err() {
        debug!("Pipeline closed, epoch marker discarded");
    }
}

/// Frame 0x80 then 0x7D, strictly in that order on the one link
async fn read_frames(session: &mut ProtocolSession) -> Result<(Vec<u8>, Vec<u8>), MemsError> {
    let frame80 = session.request_data_frame(DataFrame::Frame80).await?;
    let frame7d = session.request_data_frame(DataFrame::Frame7D).await?;
    Ok((frame80, frame7d))
}
