//! Rover MEMS 1.6 ECU Protocol
//!
//! Serial command/response exchanges with a MEMS 1.6 engine management ECU
//! and decoding of its two telemetry dataframes (0x80 and 0x7D).

mod command;
mod emulator;
mod error;
mod frame;
mod link;
mod session;

pub use command::Command;
pub use emulator::EmulatedEcu;
pub use error::MemsError;
pub use frame::{
    battery_voltage, coil_time_ms, df7d, df80, fault_mask, ignition_advance_degrees,
    lambda_millivolts, temperature_celsius, throttle_pot_voltage, DataFrame, SensorSnapshot,
};
pub use link::{LinkStream, SerialConfig, SerialLink, MEMS_BAUD_RATE};
pub use session::{ConnectionState, EcuId, InitStep, ProtocolSession, RawExchange};
