//! Emulated MEMS ECU
//!
//! Answers the command table over an in-memory stream so the reader can run
//! without hardware. Engine speed wanders a little on every 0x80 request.

use crate::command::Command;
use crate::frame::{df7d, df80};
use crate::session::EcuId;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, warn};

/// Buffer size of the in-memory link
const DUPLEX_CAPACITY: usize = 256;

/// Idle speed the emulator settles around
const IDLE_RPM: u16 = 850;

/// A simulated ECU
#[derive(Debug, Clone)]
pub struct EmulatedEcu {
    ecu_id: EcuId,
    frame80: [u8; df80::LEN],
    frame7d: [u8; df7d::LEN],
    cycle: u16,
}

impl Default for EmulatedEcu {
    fn default() -> Self {
        Self::new(EcuId::new([0x39, 0x99, 0x00, 0x02]))
    }
}

impl EmulatedEcu {
    /// Create an emulator reporting the given identity
    pub fn new(ecu_id: EcuId) -> Self {
        let mut frame80 = [0u8; df80::LEN];
        frame80[0] = df80::ID;
        frame80[1] = (df80::LEN - 1) as u8;
        frame80[df80::COOLANT_TEMP] = 140; // 85 °C
        frame80[df80::AMBIENT_TEMP] = 75;
        frame80[df80::INTAKE_AIR_TEMP] = 85;
        frame80[df80::FUEL_TEMP] = 255;
        frame80[df80::MAP_KPA] = 35;
        frame80[df80::BATTERY_VOLTAGE] = 138;
        frame80[df80::THROTTLE_POT] = 30;
        frame80[df80::IDLE_SWITCH] = 1;
        frame80[df80::PARK_NEUTRAL_SWITCH] = 1;
        frame80[df80::IDLE_SET_POINT] = 0x32;
        frame80[df80::IDLE_HOT] = 0x37;
        frame80[df80::IAC_POSITION] = 40;
        frame80[df80::IGNITION_ADVANCE_OFFSET] = 0x80;
        frame80[df80::IGNITION_ADVANCE] = 0x2E;
        frame80[df80::COIL_TIME] = 0x04;
        frame80[df80::COIL_TIME + 1] = 0x18;
        frame80[df80::CRANKSHAFT_POSITION_SENSOR] = 0x20;

        let mut frame7d = [0u8; df7d::LEN];
        frame7d[0] = df7d::ID;
        frame7d[1] = (df7d::LEN - 1) as u8;
        frame7d[df7d::IGNITION_SWITCH] = 1;
        frame7d[df7d::THROTTLE_ANGLE] = 0x24;
        frame7d[df7d::AIR_FUEL_RATIO] = 0x93;
        frame7d[df7d::LAMBDA_VOLTAGE] = 0x5A;
        frame7d[df7d::LAMBDA_SENSOR_FREQUENCY] = 0xFF;
        frame7d[df7d::LAMBDA_SENSOR_DUTYCYCLE] = 0x01;
        frame7d[df7d::LAMBDA_SENSOR_STATUS] = 0x01;
        frame7d[df7d::CLOSED_LOOP] = 1;
        frame7d[df7d::LONG_TERM_FUEL_TRIM] = 0x80;
        frame7d[df7d::SHORT_TERM_FUEL_TRIM] = 0x64;
        frame7d[df7d::IDLE_BASE_POSITION] = 0x30;
        frame7d[df7d::IGNITION_ADVANCE_2] = 0x50;
        frame7d[df7d::IDLE_SPEED_OFFSET] = 0x80;

        Self {
            ecu_id,
            frame80,
            frame7d,
            cycle: 0,
        }
    }

    /// Identity returned for 0xD0
    pub fn ecu_id(&self) -> EcuId {
        self.ecu_id
    }

    /// Response to one command, echo first
    pub fn respond(&mut self, command: Command) -> Vec<u8> {
        match command {
            Command::InitA | Command::InitB => command.bytes().to_vec(),
            Command::RequestEcuId => {
                let mut response = vec![command.opcode()];
                response.extend_from_slice(self.ecu_id.as_bytes());
                response
            }
            Command::RequestData80 => {
                self.cycle = self.cycle.wrapping_add(1);
                let rpm = IDLE_RPM + self.cycle % 40;
                self.frame80[df80::ENGINE_RPM..df80::ENGINE_RPM + 2]
                    .copy_from_slice(&rpm.to_be_bytes());
                self.frame80.to_vec()
            }
            Command::RequestData7D => self.frame7d.to_vec(),
            _ => {
                let mut response = vec![0u8; command.response_len()];
                response[0] = command.opcode();
                response
            }
        }
    }

    /// Serve commands on a background task, returning the ECU-facing stream
    pub fn spawn(mut self) -> DuplexStream {
        let (near, mut far) = tokio::io::duplex(DUPLEX_CAPACITY);

        tokio::spawn(async move {
            let mut byte = [0u8; 1];
            loop {
                if far.read_exact(&mut byte).await.is_err() {
                    debug!("Emulator link closed");
                    break;
                }

                let response = match Command::from_bytes(&byte) {
                    Ok(command) => self.respond(command),
                    Err(e) => {
                        warn!("Emulator ignoring {}", e);
                        continue;
                    }
                };

                if far.write_all(&response).await.is_err() {
                    break;
                }
            }
        });

        near
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SensorSnapshot;
    use chrono::Utc;

    #[test]
    fn test_every_command_gets_full_echoed_response() {
        let mut ecu = EmulatedEcu::default();
        for command in Command::ALL {
            let response = ecu.respond(command);
            assert_eq!(response.len(), command.response_len(), "{:?}", command);
            assert_eq!(response[0], command.opcode(), "{:?}", command);
        }
    }

    #[test]
    fn test_frames_decode() {
        let mut ecu = EmulatedEcu::default();
        let f80 = ecu.respond(Command::RequestData80);
        let f7d = ecu.respond(Command::RequestData7D);
        let snapshot = SensorSnapshot::decode(&f80, &f7d, Utc::now()).unwrap();
        assert_eq!(snapshot.engine_rpm, IDLE_RPM + 1);
        assert_eq!(snapshot.coolant_temp, 85);
        assert!(snapshot.closed_loop);
        assert_eq!(snapshot.fault_count(), 0);
    }

    #[test]
    fn test_ecu_id_payload() {
        let mut ecu = EmulatedEcu::new(EcuId::new([1, 2, 3, 4]));
        assert_eq!(ecu.respond(Command::RequestEcuId), vec![0xD0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_serves_over_stream() {
        let mut stream = EmulatedEcu::default().spawn();
        stream.write_all(&[0xF4]).await.unwrap();
        let mut response = [0u8; 2];
        stream.read_exact(&mut response).await.unwrap();
        assert_eq!(response, [0xF4, 0x00]);
    }
}
