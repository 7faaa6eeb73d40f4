//! MEMS Dataframe Layouts and Decoding
//!
//! The ECU answers `0x80` and `0x7D` with fixed-layout, big-endian frames.
//! Nothing in a frame describes its own layout, so the offsets below are the
//! contract with the hardware.
//!
//! # Dataframe 0x80 (29 bytes)
//!
//! | Offset | Size | Field                      |
//! |--------|------|----------------------------|
//! | 0      | 1    | echo (0x80)                |
//! | 1      | 1    | frame size (0x1C)          |
//! | 2      | 2    | engine rpm                 |
//! | 4      | 1    | coolant temp (+55)         |
//! | 5      | 1    | ambient temp (+55)         |
//! | 6      | 1    | intake air temp (+55)      |
//! | 7      | 1    | fuel temp (+55)            |
//! | 8      | 1    | MAP kPa                    |
//! | 9      | 1    | battery voltage (x10)      |
//! | 10     | 1    | throttle pot (/0.02 V)     |
//! | 11     | 1    | idle switch                |
//! | 12     | 1    | aircon switch              |
//! | 13     | 1    | park/neutral switch        |
//! | 14     | 1    | fault byte 0               |
//! | 15     | 1    | fault byte 1               |
//! | 16     | 1    | idle set point             |
//! | 17     | 1    | idle hot                   |
//! | 19     | 1    | IAC position               |
//! | 20     | 2    | idle error                 |
//! | 22     | 1    | ignition advance offset    |
//! | 23     | 1    | ignition advance           |
//! | 24     | 2    | coil time                  |
//! | 26     | 1    | crankshaft position sensor |
//!
//! # Dataframe 0x7D (33 bytes)
//!
//! | Offset | Field                     |
//! |--------|---------------------------|
//! | 0      | echo (0x7D)               |
//! | 1      | frame size (0x20)         |
//! | 2      | ignition switch           |
//! | 3      | throttle angle            |
//! | 5      | air/fuel ratio            |
//! | 6      | fault byte 2              |
//! | 7      | lambda voltage (/5 mV)    |
//! | 8      | lambda sensor frequency   |
//! | 9      | lambda sensor duty cycle  |
//! | 10     | lambda sensor status      |
//! | 11     | closed loop               |
//! | 12     | long term fuel trim       |
//! | 13     | short term fuel trim      |
//! | 14     | carbon canister duty cycle|
//! | 15     | fault byte 3              |
//! | 16     | idle base position        |
//! | 18     | fault byte 4              |
//! | 19     | ignition advance 2        |
//! | 20     | idle speed offset         |
//! | 21     | idle error 2              |

use crate::error::MemsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Frame 0x80 field offsets
pub mod df80 {
    pub const ID: u8 = 0x80;
    pub const LEN: usize = 29;

    pub const ENGINE_RPM: usize = 2;
    pub const COOLANT_TEMP: usize = 4;
    pub const AMBIENT_TEMP: usize = 5;
    pub const INTAKE_AIR_TEMP: usize = 6;
    pub const FUEL_TEMP: usize = 7;
    pub const MAP_KPA: usize = 8;
    pub const BATTERY_VOLTAGE: usize = 9;
    pub const THROTTLE_POT: usize = 10;
    pub const IDLE_SWITCH: usize = 11;
    pub const AIRCON_SWITCH: usize = 12;
    pub const PARK_NEUTRAL_SWITCH: usize = 13;
    pub const DTC0: usize = 14;
    pub const DTC1: usize = 15;
    pub const IDLE_SET_POINT: usize = 16;
    pub const IDLE_HOT: usize = 17;
    pub const IAC_POSITION: usize = 19;
    pub const IDLE_ERROR: usize = 20;
    pub const IGNITION_ADVANCE_OFFSET: usize = 22;
    pub const IGNITION_ADVANCE: usize = 23;
    pub const COIL_TIME: usize = 24;
    pub const CRANKSHAFT_POSITION_SENSOR: usize = 26;
}

/// Frame 0x7D field offsets
pub mod df7d {
    pub const ID: u8 = 0x7D;
    pub const LEN: usize = 33;

    pub const IGNITION_SWITCH: usize = 2;
    pub const THROTTLE_ANGLE: usize = 3;
    pub const AIR_FUEL_RATIO: usize = 5;
    pub const DTC2: usize = 6;
    pub const LAMBDA_VOLTAGE: usize = 7;
    pub const LAMBDA_SENSOR_FREQUENCY: usize = 8;
    pub const LAMBDA_SENSOR_DUTYCYCLE: usize = 9;
    pub const LAMBDA_SENSOR_STATUS: usize = 10;
    pub const CLOSED_LOOP: usize = 11;
    pub const LONG_TERM_FUEL_TRIM: usize = 12;
    pub const SHORT_TERM_FUEL_TRIM: usize = 13;
    pub const CARBON_CANISTER_DUTYCYCLE: usize = 14;
    pub const DTC3: usize = 15;
    pub const IDLE_BASE_POSITION: usize = 16;
    pub const DTC4: usize = 18;
    pub const IGNITION_ADVANCE_2: usize = 19;
    pub const IDLE_SPEED_OFFSET: usize = 20;
    pub const IDLE_ERROR_2: usize = 21;
}

/// Fault byte masks
pub mod fault_mask {
    /// dtc0 bit 0
    pub const COOLANT_TEMP_SENSOR: u8 = 0x01;
    /// dtc0 bit 1
    pub const INTAKE_AIR_TEMP_SENSOR: u8 = 0x02;
    /// dtc1 bit 1
    pub const FUEL_PUMP_CIRCUIT: u8 = 0x02;
    /// dtc1 bit 7
    pub const THROTTLE_POT_CIRCUIT: u8 = 0x80;
}

/// Temperatures are sent with a +55 offset
pub const TEMPERATURE_OFFSET: i16 = 55;

/// The two telemetry frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFrame {
    Frame80,
    Frame7D,
}

impl DataFrame {
    /// Frame identifier (also the request byte)
    pub fn id(&self) -> u8 {
        match self {
            DataFrame::Frame80 => df80::ID,
            DataFrame::Frame7D => df7d::ID,
        }
    }

    /// Minimum number of bytes the layout needs
    pub fn layout_len(&self) -> usize {
        match self {
            DataFrame::Frame80 => df80::LEN,
            DataFrame::Frame7D => df7d::LEN,
        }
    }
}

/// Decoded telemetry for one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub timestamp: DateTime<Utc>,

    // dataframe 0x80
    pub engine_rpm: u16,
    /// °C
    pub coolant_temp: i16,
    /// °C
    pub ambient_temp: i16,
    /// °C
    pub intake_air_temp: i16,
    /// °C
    pub fuel_temp: i16,
    pub map_kpa: f32,
    /// Whole volts, see [`battery_voltage`]
    pub battery_voltage: f32,
    pub throttle_pot_voltage: f32,
    pub idle_switch: bool,
    pub aircon_switch: bool,
    pub park_neutral_switch: bool,
    /// Raw fault byte 0
    pub fault_codes: u8,
    /// Raw fault byte 1
    pub fault_codes_2: u8,
    pub idle_set_point: u8,
    pub idle_hot: u8,
    pub iac_position: u8,
    pub idle_error: u16,
    pub ignition_advance_offset: u8,
    /// Degrees
    pub ignition_advance: f32,
    /// Milliseconds
    pub coil_time: f32,
    pub crankshaft_position_sensor: u8,
    pub coolant_temp_sensor_fault: bool,
    pub intake_air_temp_sensor_fault: bool,
    pub fuel_pump_circuit_fault: bool,
    pub throttle_pot_circuit_fault: bool,

    // dataframe 0x7D
    pub ignition_switch: bool,
    pub throttle_angle: u8,
    pub air_fuel_ratio: u8,
    /// Millivolts
    pub lambda_voltage: u16,
    pub lambda_sensor_frequency: u8,
    pub lambda_sensor_dutycycle: u8,
    pub lambda_sensor_status: u8,
    pub closed_loop: bool,
    pub long_term_fuel_trim: u8,
    pub short_term_fuel_trim: u8,
    pub carbon_canister_dutycycle: u8,
    pub idle_base_position: u8,
    pub ignition_advance_2: u8,
    pub idle_speed_offset: u8,
    pub idle_error_2: u8,

    /// Raw frames, lower case hex
    pub dataframe80: String,
    pub dataframe7d: String,
}

impl SensorSnapshot {
    /// Decode a pair of frames captured in the same poll cycle
    pub fn decode(
        frame80: &[u8],
        frame7d: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<Self, MemsError> {
        check_frame(DataFrame::Frame80, frame80)?;
        check_frame(DataFrame::Frame7D, frame7d)?;

        let dtc0 = frame80[df80::DTC0];
        let dtc1 = frame80[df80::DTC1];

        Ok(Self {
            timestamp,

            engine_rpm: be_u16(frame80, df80::ENGINE_RPM),
            coolant_temp: temperature_celsius(frame80[df80::COOLANT_TEMP]),
            ambient_temp: temperature_celsius(frame80[df80::AMBIENT_TEMP]),
            intake_air_temp: temperature_celsius(frame80[df80::INTAKE_AIR_TEMP]),
            fuel_temp: temperature_celsius(frame80[df80::FUEL_TEMP]),
            map_kpa: f32::from(frame80[df80::MAP_KPA]),
            battery_voltage: battery_voltage(frame80[df80::BATTERY_VOLTAGE]),
            throttle_pot_voltage: throttle_pot_voltage(frame80[df80::THROTTLE_POT]),
            idle_switch: frame80[df80::IDLE_SWITCH] != 0,
            aircon_switch: frame80[df80::AIRCON_SWITCH] != 0,
            park_neutral_switch: frame80[df80::PARK_NEUTRAL_SWITCH] != 0,
            fault_codes: dtc0,
            fault_codes_2: dtc1,
            idle_set_point: frame80[df80::IDLE_SET_POINT],
            idle_hot: frame80[df80::IDLE_HOT],
            iac_position: frame80[df80::IAC_POSITION],
            idle_error: be_u16(frame80, df80::IDLE_ERROR),
            ignition_advance_offset: frame80[df80::IGNITION_ADVANCE_OFFSET],
            ignition_advance: ignition_advance_degrees(u16::from(
                frame80[df80::IGNITION_ADVANCE],
            )),
            coil_time: coil_time_ms(be_u16(frame80, df80::COIL_TIME)),
            crankshaft_position_sensor: frame80[df80::CRANKSHAFT_POSITION_SENSOR],
            coolant_temp_sensor_fault: dtc0 & fault_mask::COOLANT_TEMP_SENSOR != 0,
            intake_air_temp_sensor_fault: dtc0 & fault_mask::INTAKE_AIR_TEMP_SENSOR != 0,
            fuel_pump_circuit_fault: dtc1 & fault_mask::FUEL_PUMP_CIRCUIT != 0,
            throttle_pot_circuit_fault: dtc1 & fault_mask::THROTTLE_POT_CIRCUIT != 0,

            ignition_switch: frame7d[df7d::IGNITION_SWITCH] != 0,
            throttle_angle: frame7d[df7d::THROTTLE_ANGLE],
            air_fuel_ratio: frame7d[df7d::AIR_FUEL_RATIO],
            lambda_voltage: lambda_millivolts(frame7d[df7d::LAMBDA_VOLTAGE]),
            lambda_sensor_frequency: frame7d[df7d::LAMBDA_SENSOR_FREQUENCY],
            lambda_sensor_dutycycle: frame7d[df7d::LAMBDA_SENSOR_DUTYCYCLE],
            lambda_sensor_status: frame7d[df7d::LAMBDA_SENSOR_STATUS],
            closed_loop: frame7d[df7d::CLOSED_LOOP] != 0,
            long_term_fuel_trim: frame7d[df7d::LONG_TERM_FUEL_TRIM],
            short_term_fuel_trim: frame7d[df7d::SHORT_TERM_FUEL_TRIM],
            carbon_canister_dutycycle: frame7d[df7d::CARBON_CANISTER_DUTYCYCLE],
            idle_base_position: frame7d[df7d::IDLE_BASE_POSITION],
            ignition_advance_2: frame7d[df7d::IGNITION_ADVANCE_2],
            idle_speed_offset: frame7d[df7d::IDLE_SPEED_OFFSET],
            idle_error_2: frame7d[df7d::IDLE_ERROR_2],

            dataframe80: hex::encode(frame80),
            dataframe7d: hex::encode(frame7d),
        })
    }

    /// Number of fault flags currently raised
    pub fn fault_count(&self) -> usize {
        [
            self.coolant_temp_sensor_fault,
            self.intake_air_temp_sensor_fault,
            self.fuel_pump_circuit_fault,
            self.throttle_pot_circuit_fault,
        ]
        .iter()
        .filter(|&&f| f)
        .count()
    }
}

/// Long enough for the layout and led by the frame's own id byte
fn check_frame(frame: DataFrame, bytes: &[u8]) -> Result<(), MemsError> {
    if bytes.len() < frame.layout_len() {
        return Err(MemsError::MalformedFrame {
            frame: frame.id(),
            expected: frame.layout_len(),
            actual: bytes.len(),
        });
    }
    if bytes[0] != frame.id() {
        return Err(MemsError::WrongFrameId {
            frame: frame.id(),
            actual: bytes[0],
        });
    }
    Ok(())
}

fn be_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

/// raw - 55 °C
pub fn temperature_celsius(raw: u8) -> i16 {
    i16::from(raw) - TEMPERATURE_OFFSET
}

/// Battery voltage in whole volts.
///
/// The ECU sends tenths of a volt; the division is integer so 12.6 V reads as
/// 12.0, matching logs written by existing readers.
pub fn battery_voltage(raw: u8) -> f32 {
    f32::from(raw / 10)
}

/// raw x 0.02 V
pub fn throttle_pot_voltage(raw: u8) -> f32 {
    f32::from(raw) * 0.02
}

/// raw x 0.05 - 24 degrees
pub fn ignition_advance_degrees(raw: u16) -> f32 {
    f32::from(raw) * 0.05 - 24.0
}

/// raw x 0.002 ms
pub fn coil_time_ms(raw: u16) -> f32 {
    f32::from(raw) * 0.002
}

/// raw x 5 mV
pub fn lambda_millivolts(raw: u8) -> u16 {
    u16::from(raw) * 5
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame80() -> Vec<u8> {
        let mut f = vec![0u8; df80::LEN];
        f[0] = df80::ID;
        f[1] = 0x1C;
        f
    }

    fn frame7d() -> Vec<u8> {
        let mut f = vec![0u8; df7d::LEN];
        f[0] = df7d::ID;
        f[1] = 0x20;
        f
    }

    fn decode(f80: &[u8], f7d: &[u8]) -> SensorSnapshot {
        SensorSnapshot::decode(f80, f7d, Utc::now()).unwrap()
    }

    #[test]
    fn test_known_frames_end_to_end() {
        let mut f80 = frame80();
        // 800 rpm = 0x0320
        f80[df80::ENGINE_RPM] = 0x03;
        f80[df80::ENGINE_RPM + 1] = 0x20;
        f80[df80::COOLANT_TEMP] = 95;
        f80[df80::MAP_KPA] = 35;
        f80[df80::BATTERY_VOLTAGE] = 126;
        f80[df80::THROTTLE_POT] = 50;
        f80[df80::IGNITION_ADVANCE] = 0;
        f80[df80::COIL_TIME] = 0x01;
        f80[df80::COIL_TIME + 1] = 0xF4;
        f80[df80::IDLE_ERROR] = 0x01;
        f80[df80::IDLE_ERROR + 1] = 0x02;

        let mut f7d = frame7d();
        f7d[df7d::IGNITION_SWITCH] = 1;
        f7d[df7d::LAMBDA_VOLTAGE] = 90;
        f7d[df7d::CLOSED_LOOP] = 1;
        f7d[df7d::LONG_TERM_FUEL_TRIM] = 128;

        let snapshot = decode(&f80, &f7d);
        assert_eq!(snapshot.engine_rpm, 800);
        assert_eq!(snapshot.coolant_temp, 40);
        assert_eq!(snapshot.map_kpa, 35.0);
        assert_eq!(snapshot.battery_voltage, 12.0);
        assert!((snapshot.throttle_pot_voltage - 1.0).abs() < 1e-6);
        assert_eq!(snapshot.ignition_advance, -24.0);
        assert!((snapshot.coil_time - 1.0).abs() < 1e-6);
        assert_eq!(snapshot.idle_error, 0x0102);
        assert!(snapshot.ignition_switch);
        assert!(snapshot.closed_loop);
        assert_eq!(snapshot.lambda_voltage, 450);
        assert_eq!(snapshot.long_term_fuel_trim, 128);
        assert_eq!(snapshot.dataframe80, hex::encode(&f80));
        assert_eq!(snapshot.dataframe7d, hex::encode(&f7d));
        assert!(snapshot.dataframe80.starts_with("801c0320"));
    }

    #[test]
    fn test_temperature_offset_extremes() {
        assert_eq!(temperature_celsius(0), -55);
        assert_eq!(temperature_celsius(55), 0);
        assert_eq!(temperature_celsius(255), 200);
    }

    #[test]
    fn test_scale_factors() {
        assert!((throttle_pot_voltage(50) - 1.0).abs() < 1e-6);
        assert!((ignition_advance_degrees(480) - 0.0).abs() < 1e-5);
        assert_eq!(ignition_advance_degrees(0), -24.0);
        assert!((coil_time_ms(1000) - 2.0).abs() < 1e-6);
        assert_eq!(lambda_millivolts(200), 1000);
    }

    #[test]
    fn test_battery_voltage_truncates_tenths() {
        assert_eq!(battery_voltage(126), 12.0);
        assert_eq!(battery_voltage(139), 13.0);
        assert_eq!(battery_voltage(9), 0.0);
    }

    #[test]
    fn test_fault_flags_from_first_byte() {
        let mut f80 = frame80();
        f80[df80::DTC0] = 0x01;
        let s = decode(&f80, &frame7d());
        assert!(s.coolant_temp_sensor_fault);
        assert!(!s.intake_air_temp_sensor_fault);
        assert!(!s.fuel_pump_circuit_fault);
        assert!(!s.throttle_pot_circuit_fault);

        f80[df80::DTC0] = 0x02;
        let s = decode(&f80, &frame7d());
        assert!(!s.coolant_temp_sensor_fault);
        assert!(s.intake_air_temp_sensor_fault);
        assert!(!s.fuel_pump_circuit_fault);
        assert!(!s.throttle_pot_circuit_fault);
    }

    #[test]
    fn test_fault_flags_from_second_byte() {
        let mut f80 = frame80();
        f80[df80::DTC1] = 0x02;
        let s = decode(&f80, &frame7d());
        assert!(s.fuel_pump_circuit_fault);
        assert!(!s.throttle_pot_circuit_fault);
        assert!(!s.coolant_temp_sensor_fault);
        assert!(!s.intake_air_temp_sensor_fault);

        f80[df80::DTC1] = 0x80;
        let s = decode(&f80, &frame7d());
        assert!(!s.fuel_pump_circuit_fault);
        assert!(s.throttle_pot_circuit_fault);
        assert!(!s.coolant_temp_sensor_fault);
        assert!(!s.intake_air_temp_sensor_fault);
    }

    #[test]
    fn test_unmasked_bits_raise_nothing() {
        let mut f80 = frame80();
        f80[df80::DTC0] = !0x03;
        f80[df80::DTC1] = !0x82;
        let s = decode(&f80, &frame7d());
        assert_eq!(s.fault_count(), 0);
        assert_eq!(s.fault_codes, 0xFC);
        assert_eq!(s.fault_codes_2, 0x7D);
    }

    #[test]
    fn test_switches_are_nonzero() {
        let mut f80 = frame80();
        f80[df80::IDLE_SWITCH] = 0x7F;
        f80[df80::PARK_NEUTRAL_SWITCH] = 0x00;
        let mut f7d = frame7d();
        f7d[df7d::IGNITION_SWITCH] = 0x80;
        let s = decode(&f80, &f7d);
        assert!(s.idle_switch);
        assert!(!s.park_neutral_switch);
        assert!(s.ignition_switch);
        assert!(!s.closed_loop);
    }

    #[test]
    fn test_short_frame80_is_malformed() {
        let short = &frame80()[..10];
        match SensorSnapshot::decode(short, &frame7d(), Utc::now()) {
            Err(MemsError::MalformedFrame {
                frame,
                expected,
                actual,
            }) => {
                assert_eq!(frame, 0x80);
                assert_eq!(expected, 29);
                assert_eq!(actual, 10);
            }
            other => panic!("expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_short_frame7d_is_malformed() {
        let result = SensorSnapshot::decode(&frame80(), &[0x7D], Utc::now());
        assert!(matches!(
            result,
            Err(MemsError::MalformedFrame { frame: 0x7D, .. })
        ));
        assert!(SensorSnapshot::decode(&[], &[], Utc::now()).is_err());
    }

    #[test]
    fn test_longer_frame_keeps_surplus_in_hex() {
        let mut f80 = frame80();
        f80.push(0xEE);
        let s = decode(&f80, &frame7d());
        assert!(s.dataframe80.ends_with("ee"));
        assert_eq!(s.dataframe80.len(), 60);
    }

    #[test]
    fn test_frames_must_lead_with_their_id() {
        let mut f80 = frame80();
        f80[0] = 0x00;
        match SensorSnapshot::decode(&f80, &frame7d(), Utc::now()) {
            Err(err @ MemsError::WrongFrameId { frame: 0x80, actual: 0x00 }) => {
                assert!(err.is_decode_error());
                assert!(!err.is_link_fatal());
            }
            other => panic!("expected wrong frame id, got {:?}", other),
        }

        // frames swapped within the cycle
        let result = SensorSnapshot::decode(&frame80(), &frame80(), Utc::now());
        assert!(matches!(
            result,
            Err(MemsError::WrongFrameId { frame: 0x7D, actual: 0x80 })
        ));
    }

    proptest! {
        #[test]
        fn prop_every_temperature_byte_is_offset(raw in any::<u8>()) {
            let mut f80 = frame80();
            f80[df80::COOLANT_TEMP] = raw;
            f80[df80::AMBIENT_TEMP] = raw;
            f80[df80::INTAKE_AIR_TEMP] = raw;
            f80[df80::FUEL_TEMP] = raw;
            let s = decode(&f80, &frame7d());
            let expected = raw as i16 - 55;
            prop_assert_eq!(s.coolant_temp, expected);
            prop_assert_eq!(s.ambient_temp, expected);
            prop_assert_eq!(s.intake_air_temp, expected);
            prop_assert_eq!(s.fuel_temp, expected);
        }

        #[test]
        fn prop_fault_flags_track_their_bit(dtc0 in any::<u8>(), dtc1 in any::<u8>()) {
            let mut f80 = frame80();
            f80[df80::DTC0] = dtc0;
            f80[df80::DTC1] = dtc1;
            let s = decode(&f80, &frame7d());
            prop_assert_eq!(s.coolant_temp_sensor_fault, dtc0 & 0x01 != 0);
            prop_assert_eq!(s.intake_air_temp_sensor_fault, dtc0 & 0x02 != 0);
            prop_assert_eq!(s.fuel_pump_circuit_fault, dtc1 & 0x02 != 0);
            prop_assert_eq!(s.throttle_pot_circuit_fault, dtc1 & 0x80 != 0);
        }

        #[test]
        fn prop_throttle_scale(raw in any::<u8>()) {
            prop_assert_eq!(throttle_pot_voltage(raw), raw as f32 * 0.02);
        }
    }
}
