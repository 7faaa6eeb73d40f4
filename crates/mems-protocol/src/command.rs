//! MEMS 1.6 Command Table
//!
//! Every command is a single byte and the ECU answers with a fixed number of
//! bytes, the first of which echoes the command.

use crate::error::MemsError;
use serde::{Deserialize, Serialize};

/// Known MEMS 1.6 commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// First initialisation byte (0xCA)
    InitA,
    /// Second initialisation byte (0x75)
    InitB,
    /// Keep-alive (0xF4)
    Heartbeat,
    /// Request the 4-byte ECU identity (0xD0)
    RequestEcuId,
    /// Request dataframe 0x80
    RequestData80,
    /// Request dataframe 0x7D
    RequestData7D,
    /// Clear stored fault codes (0xCC)
    ClearFaults,
    FuelPumpOn,
    FuelPumpOff,
    PtcRelayOn,
    PtcRelayOff,
    AirconOn,
    AirconOff,
    PurgeValveOn,
    PurgeValveOff,
    O2HeaterOn,
    O2HeaterOff,
    FanOneOn,
    FanOneOff,
    FanTwoOn,
    FanTwoOff,
}

impl Command {
    /// All commands in the table
    pub const ALL: [Command; 21] = [
        Command::InitA,
        Command::InitB,
        Command::Heartbeat,
        Command::RequestEcuId,
        Command::RequestData80,
        Command::RequestData7D,
        Command::ClearFaults,
        Command::FuelPumpOn,
        Command::FuelPumpOff,
        Command::PtcRelayOn,
        Command::PtcRelayOff,
        Command::AirconOn,
        Command::AirconOff,
        Command::PurgeValveOn,
        Command::PurgeValveOff,
        Command::O2HeaterOn,
        Command::O2HeaterOff,
        Command::FanOneOn,
        Command::FanOneOff,
        Command::FanTwoOn,
        Command::FanTwoOff,
    ];

    /// Bytes written to the ECU
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            Command::InitA => &[0xCA],
            Command::InitB => &[0x75],
            Command::Heartbeat => &[0xF4],
            Command::RequestEcuId => &[0xD0],
            Command::RequestData80 => &[0x80],
            Command::RequestData7D => &[0x7D],
            Command::ClearFaults => &[0xCC],
            Command::FuelPumpOn => &[0x11],
            Command::FuelPumpOff => &[0x01],
            Command::PtcRelayOn => &[0x12],
            Command::PtcRelayOff => &[0x02],
            Command::AirconOn => &[0x13],
            Command::AirconOff => &[0x03],
            Command::PurgeValveOn => &[0x18],
            Command::PurgeValveOff => &[0x08],
            Command::O2HeaterOn => &[0x19],
            Command::O2HeaterOff => &[0x09],
            Command::FanOneOn => &[0x1D],
            Command::FanOneOff => &[0x0D],
            Command::FanTwoOn => &[0x1E],
            Command::FanTwoOff => &[0x0E],
        }
    }

    /// First command byte, which the response must echo
    pub fn opcode(&self) -> u8 {
        self.bytes()[0]
    }

    /// Number of response bytes, echo included
    pub fn response_len(&self) -> usize {
        match self {
            Command::InitA | Command::InitB => 1,
            Command::RequestEcuId => 5,
            Command::RequestData80 => 29,
            Command::RequestData7D => 33,
            _ => 2,
        }
    }

    /// Look a command up by the bytes it writes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MemsError> {
        Self::ALL
            .iter()
            .copied()
            .find(|cmd| cmd.bytes() == bytes)
            .ok_or_else(|| MemsError::UnknownCommand(bytes.to_vec()))
    }

    /// True for the two telemetry requests
    pub fn is_data_frame(&self) -> bool {
        matches!(self, Command::RequestData80 | Command::RequestData7D)
    }
}
