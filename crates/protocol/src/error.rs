//! Protocol error types

use thiserror::Error;

/// Faults raised while talking to a sensor
///
/// Every variant is recoverable from the point of view of the daemon: the
/// sensor that produced it is torn down, the process keeps running.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The device accepted fewer bytes than the command frame
    #[error("Short write ({written}/{expected})")]
    ShortWrite { written: usize, expected: usize },

    /// Response shorter than its header or declared payload
    #[error("Short response: expected {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },

    /// Response echoed a different command byte
    #[error("Unexpected response to command {expected:#04x}: got {actual:#04x}")]
    UnexpectedCommand { expected: u8, actual: u8 },

    /// Response declared a different payload length
    #[error("Unexpected payload length for command {command:#04x}: expected {expected}, got {actual}")]
    UnexpectedLength { command: u8, expected: u8, actual: u8 },

    /// Operation not supported by this sensor variant
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// The channel to the device has already been closed
    #[error("Device channel closed")]
    Closed,

    /// I/O error from the underlying device node
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnexpectedCommand {
            expected: 0x80,
            actual: 0x82,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("0x80"));
        assert!(msg.contains("0x82"));
    }

    #[test]
    fn test_short_write_display() {
        let err = ProtocolError::ShortWrite {
            written: 3,
            expected: 9,
        };
        assert_eq!(format!("{}", err), "Short write (3/9)");
    }
}
