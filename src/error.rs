//! Typed failures that cross the protocol boundary.

use thiserror::Error;

/// Why an inbound buffer could not be turned into a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,

    #[error("unknown message type {0}")]
    UnknownType(u8),

    /// Fewer bytes than the layout (or the declared entry count) requires.
    #[error("truncated message: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// More bytes than the layout (or the declared entry count) accounts for.
    #[error("oversized message: expected {expected} bytes, got {actual}")]
    TrailingBytes { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("fail_window must be at least 1 tick")]
    ZeroFailWindow,

    #[error("fail_window {0} plus remove_window {1} overflows")]
    WindowOverflow(u64, u64),

    #[error("fanout must be at least 1")]
    ZeroFanout,

    #[error("admission probability {0} is outside [0, 1]")]
    AdmissionProbability(f64),

    #[error("drop probability {0} is outside [0, 1]")]
    DropProbability(f64),
}

#[test]
fn decode_error_display() {
    assert_eq!("unknown message type 9", DecodeError::UnknownType(9).to_string());
    assert_eq!(
        "truncated message: expected 15 bytes, got 3",
        DecodeError::Truncated { expected: 15, actual: 3 }.to_string()
    );
    assert_eq!(
        "oversized message: expected 5 bytes, got 8",
        DecodeError::TrailingBytes { expected: 5, actual: 8 }.to_string()
    );
}
