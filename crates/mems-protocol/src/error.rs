//! MEMS Protocol Error Types

use crate::session::InitStep;
use thiserror::Error;

/// Errors that can occur while talking to a MEMS ECU
#[derive(Debug, Error)]
pub enum MemsError {
    /// Serial port could not be opened
    #[error("Failed to open serial port {port}: {reason}")]
    Connection { port: String, reason: String },

    /// A single read or write on the link failed
    #[error("Serial I/O error: {0}")]
    Io(String),

    /// Timeout waiting for response
    #[error("Timeout waiting for ECU response after {0}ms")]
    Timeout(u64),

    /// Response did not start with the command byte, the link is out of step
    #[error("Expected command echo {sent:02X}, ECU replied {received:02X}")]
    ProtocolEchoMismatch { sent: u8, received: u8 },

    /// Dataframe shorter than its fixed layout
    #[error("Malformed dataframe {frame:02X}: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        frame: u8,
        expected: usize,
        actual: usize,
    },

    /// Dataframe does not start with its own id byte
    #[error("Malformed dataframe {frame:02X}: starts with {actual:02X}")]
    WrongFrameId { frame: u8, actual: u8 },

    /// Command bytes are not in the command table
    #[error("Unknown command {0:02X?}")]
    UnknownCommand(Vec<u8>),

    /// A step of the initialisation handshake failed
    #[error("Initialisation failed at {step}: {source}")]
    InitializationFailed {
        step: InitStep,
        #[source]
        source: Box<MemsError>,
    },

    /// Operation needs a connected (or initialised) session
    #[error("ECU session is not connected")]
    NotConnected,
}

impl MemsError {
    /// True when the error leaves the link unusable and ends the connection epoch.
    ///
    /// Decode failures and configuration errors are not link-fatal; the
    /// polling loop skips them and carries on.
    pub fn is_link_fatal(&self) -> bool {
        match self {
            MemsError::Connection { .. }
            | MemsError::Io(_)
            | MemsError::Timeout(_)
            | MemsError::ProtocolEchoMismatch { .. }
            | MemsError::NotConnected => true,
            MemsError::InitializationFailed { source, .. } => source.is_link_fatal(),
            MemsError::MalformedFrame { .. }
            | MemsError::WrongFrameId { .. }
            | MemsError::UnknownCommand(_) => false,
        }
    }

    /// True when a dataframe could not be decoded; only that poll cycle is lost
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            MemsError::MalformedFrame { .. } | MemsError::WrongFrameId { .. }
        )
    }

    /// True for an echo mismatch, directly or as the cause of a failed handshake
    pub fn is_desync(&self) -> bool {
        match self {
            MemsError::ProtocolEchoMismatch { .. } => true,
            MemsError::InitializationFailed { source, .. } => source.is_desync(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for MemsError {
    fn from(err: std::io::Error) -> Self {
        MemsError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_errors_are_not_link_fatal() {
        let err = MemsError::MalformedFrame {
            frame: 0x80,
            expected: 29,
            actual: 3,
        };
        assert!(!err.is_link_fatal());
        assert!(err.is_decode_error());
        assert!(!MemsError::UnknownCommand(vec![0xAB]).is_link_fatal());
        assert!(!MemsError::UnknownCommand(vec![0xAB]).is_decode_error());
        assert!(!MemsError::Timeout(500).is_decode_error());
    }

    #[test]
    fn test_echo_mismatch_is_fatal_desync() {
        let err = MemsError::ProtocolEchoMismatch {
            sent: 0x80,
            received: 0x7D,
        };
        assert!(err.is_link_fatal());
        assert!(err.is_desync());
        assert!(!MemsError::Timeout(500).is_desync());
    }

    #[test]
    fn test_init_failure_inherits_cause() {
        let err = MemsError::InitializationFailed {
            step: InitStep::InitB,
            source: Box::new(MemsError::ProtocolEchoMismatch {
                sent: 0x75,
                received: 0x00,
            }),
        };
        assert!(err.is_desync());
        assert!(err.to_string().contains("InitB"));
    }
}
