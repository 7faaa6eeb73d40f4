//! MEMS Protocol Session
//!
//! Command/response discipline on top of a [`SerialLink`]: one command, one
//! fixed-length response, and the response must echo the command byte.

use crate::command::Command;
use crate::error::MemsError;
use crate::frame::DataFrame;
use crate::link::{SerialConfig, SerialLink};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Connection lifecycle.
///
/// A new session is `Connecting` until the ECU echoes its first command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Initialized,
}

/// Steps of the initialisation handshake, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitStep {
    InitA,
    InitB,
    Heartbeat,
    RequestEcuId,
}

impl InitStep {
    /// Handshake order
    pub const SEQUENCE: [InitStep; 4] = [
        InitStep::InitA,
        InitStep::InitB,
        InitStep::Heartbeat,
        InitStep::RequestEcuId,
    ];

    /// Command sent for this step
    pub fn command(&self) -> Command {
        match self {
            InitStep::InitA => Command::InitA,
            InitStep::InitB => Command::InitB,
            InitStep::Heartbeat => Command::Heartbeat,
            InitStep::RequestEcuId => Command::RequestEcuId,
        }
    }
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// ECU identity from the 0xD0 response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EcuId([u8; 4]);

impl EcuId {
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Prefix used to name log files for this ECU
    pub fn log_prefix(&self) -> String {
        format!("{}-", self)
    }
}

impl fmt::Display for EcuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// One command and the response it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExchange {
    pub command: Command,
    pub response: Vec<u8>,
}

impl RawExchange {
    /// Response as lower case hex
    pub fn response_hex(&self) -> String {
        hex::encode(&self.response)
    }
}

/// Session with one ECU over one link
pub struct ProtocolSession {
    link: SerialLink,
    state: ConnectionState,
    ecu_id: Option<EcuId>,
}

impl ProtocolSession {
    /// Open a serial port and wrap it in a session
    pub fn connect(port: &str, config: &SerialConfig) -> Result<Self, MemsError> {
        debug!("Opening link to ECU on {}", port);
        let link = SerialLink::open(port, config)?;
        Ok(Self::new(link))
    }

    /// Session over an already open link
    pub fn new(link: SerialLink) -> Self {
        info!("ECU session opened via {}", link.name());
        Self {
            link,
            state: ConnectionState::Connecting,
            ecu_id: None,
        }
    }

    /// Run the handshake: InitA, InitB, Heartbeat, RequestECUID
    pub async fn initialize(&mut self) -> Result<EcuId, MemsError> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(MemsError::NotConnected);
        }

        info!("Initialising ECU on {}", self.link.name());

        let mut ecu_id = None;
        for step in InitStep::SEQUENCE {
            let exchange = self
                .send_command(step.command())
                .await
                .map_err(|e| {
                    error!("ECU initialisation failed at {}: {}", step, e);
                    MemsError::InitializationFailed {
                        step,
                        source: Box::new(e),
                    }
                })?;

            if step == InitStep::RequestEcuId {
                let mut id = [0u8; 4];
                id.copy_from_slice(&exchange.response[1..5]);
                ecu_id = Some(EcuId::new(id));
            }
        }

        let ecu_id = ecu_id.ok_or(MemsError::NotConnected)?;
        self.ecu_id = Some(ecu_id);
        self.state = ConnectionState::Initialized;
        info!("ECU {} initialised", ecu_id);
        Ok(ecu_id)
    }

    /// Send a command and read its full, echo-checked response
    pub async fn send_command(&mut self, command: Command) -> Result<RawExchange, MemsError> {
        if !self.is_connected() {
            return Err(MemsError::NotConnected);
        }

        let response = match self.exchange(command).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Exchange {:?} failed: {}", command, e);
                self.mark_disconnected();
                return Err(e);
            }
        };

        if response[0] != command.opcode() {
            error!(
                "Expecting command echo {:02X}, got {}",
                command.opcode(),
                hex::encode(&response)
            );
            self.mark_disconnected();
            return Err(MemsError::ProtocolEchoMismatch {
                sent: command.opcode(),
                received: response[0],
            });
        }

        if self.state == ConnectionState::Connecting {
            info!("ECU answering on {}", self.link.name());
            self.state = ConnectionState::Connected;
        }

        Ok(RawExchange { command, response })
    }

    /// Look raw command bytes up in the command table and send them
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<RawExchange, MemsError> {
        let command = Command::from_bytes(bytes)?;
        self.send_command(command).await
    }

    /// Request one telemetry frame, undecoded
    pub async fn request_data_frame(&mut self, which: DataFrame) -> Result<Vec<u8>, MemsError> {
        let command = match which {
            DataFrame::Frame80 => Command::RequestData80,
            DataFrame::Frame7D => Command::RequestData7D,
        };
        Ok(self.send_command(command).await?.response)
    }

    /// Drop back to disconnected; the link stays owned until the session is dropped
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            info!("Disconnecting from ECU on {}", self.link.name());
        }
        self.mark_disconnected();
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Initialized
        )
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ConnectionState::Initialized
    }

    /// Identity learned during initialisation
    pub fn ecu_id(&self) -> Option<EcuId> {
        self.ecu_id
    }

    pub fn is_emulated(&self) -> bool {
        self.link.is_emulated()
    }

    async fn exchange(&mut self, command: Command) -> Result<Vec<u8>, MemsError> {
        self.link.write(command.bytes()).await?;
        self.link.read(command.response_len()).await
    }

    fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}
