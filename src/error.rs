//! # Bus Error Handling
//!
//! This module defines the BusError enum, which represents the different error
//! types that can occur while talking to transmitters on the serial bus.

use thiserror::Error;

/// Represents the different error types that can occur on the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The request does not fit into the transmit buffer.
    #[error("Request of {len} bytes exceeds transmit buffer of {capacity} bytes")]
    EncodingOverflow { len: usize, capacity: usize },

    /// Zero bytes were read.
    #[error("Empty response")]
    EmptyResponse,

    /// No data arrived within the read timeout.
    #[error("Read timeout")]
    Timeout,

    /// The trailing BCC does not match the XOR of the frame.
    #[error("BCC mismatch: expected 0x{expected:02X}, calculated 0x{calculated:02X}")]
    ChecksumMismatch { expected: u8, calculated: u8 },

    /// The device answered with NAK.
    #[error("Negative acknowledge from address {0}")]
    NegativeAcknowledge(u8),

    /// The device answered with a status the command does not accept.
    #[error("Unexpected status 0x{status:02X} from address {address}")]
    UnexpectedStatus { address: u8, status: u8 },

    /// Every attempt of a command failed; carries the last failure.
    #[error("Retries exhausted after {attempts} attempts at address {address}: {last}")]
    RetriesExhausted {
        address: u8,
        attempts: u32,
        last: Box<BusError>,
    },

    /// The serial device could not be opened.
    #[error("Failed to open port {path}: {reason}")]
    TransportOpen { path: String, reason: String },

    /// Any other I/O error on an open transport.
    #[error("Serial port error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    /// Whether another attempt of the same command can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            BusError::EncodingOverflow { .. } | BusError::TransportOpen { .. }
        )
    }
}
