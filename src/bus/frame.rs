//! # Transmitter Frame Codec
//!
//! This module encodes request frames and decodes response frames of the
//! transmitter bus protocol.
//!
//! A request frame on the wire:
//!
//! ```text
//! | ADR | 0x80 | payload ... | ETX | BCC |
//! ```
//!
//! The first byte is the device address with the marker bit set. The BCC is
//! the XOR of the payload bytes and the ETX; the address byte is not part of
//! the checksum.
//!
//! A response frame starts with a status byte (address echo, ACK or NAK),
//! followed by the payload, an optional ETX and a BCC that is the XOR of
//! every preceding byte of the response.
//!
//! ## Usage
//!
//! ```
//! use tempreg::bus::frame::{decode_response, encode_request, encode_response};
//! use tempreg::constants::ACK;
//!
//! let request = encode_request("SN ?", 0x01).unwrap();
//! assert_eq!(request[0], 0x81);
//!
//! let reply = encode_response(ACK, "23.5").unwrap();
//! let response = decode_response(&reply).unwrap();
//! assert_eq!(response.status, ACK);
//! assert_eq!(response.payload, "23.5");
//! ```

use crate::constants::{ADDRESS_MARKER, ETX, RX_BUFFER_LEN, TX_BUFFER_LEN};
use crate::error::BusError;
use bytes::{BufMut, Bytes, BytesMut};

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// First byte of the frame
    pub status: u8,
    /// Filtered payload text
    pub payload: String,
}

/// XOR of all bytes.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |bcc, b| bcc ^ b)
}

/// Builds the request frame for `command` addressed to `address`.
///
/// Fails with [`BusError::EncodingOverflow`] if the frame would not fit into
/// the transmit buffer.
pub fn encode_request(command: &str, address: u8) -> Result<Bytes, BusError> {
    let payload = command.as_bytes();
    // address + payload + ETX + BCC
    let len = payload.len() + 3;
    if len > TX_BUFFER_LEN {
        return Err(BusError::EncodingOverflow {
            len,
            capacity: TX_BUFFER_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(len);
    buf.put_u8(address | ADDRESS_MARKER);
    buf.put_slice(payload);
    buf.put_u8(ETX);
    buf.put_u8(checksum(payload) ^ ETX);
    Ok(buf.freeze())
}

/// Builds a response frame as a device would send it.
pub fn encode_response(status: u8, payload: &str) -> Result<Bytes, BusError> {
    let len = payload.len() + 3;
    if len > RX_BUFFER_LEN {
        return Err(BusError::EncodingOverflow {
            len,
            capacity: RX_BUFFER_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(len);
    buf.put_u8(status);
    buf.put_slice(payload.as_bytes());
    buf.put_u8(ETX);
    let bcc = checksum(&buf);
    buf.put_u8(bcc);
    Ok(buf.freeze())
}

/// Verifies and unpacks a raw response.
pub fn decode_response(raw: &[u8]) -> Result<Response, BusError> {
    let (&expected, body) = raw.split_last().ok_or(BusError::EmptyResponse)?;

    let calculated = checksum(body);
    if calculated != expected {
        return Err(BusError::ChecksumMismatch {
            expected,
            calculated,
        });
    }

    // A lone BCC carries no status byte.
    let (&status, rest) = body.split_first().ok_or(BusError::EmptyResponse)?;

    let text = match rest.iter().position(|&b| b == ETX) {
        Some(pos) => &rest[..pos],
        None => rest,
    };

    let payload = text
        .iter()
        .copied()
        .filter(|&b| is_payload_byte(b))
        .map(char::from)
        .collect();

    Ok(Response { status, payload })
}

/// Printable, whitespace or NUL. Bytes above 0x7F are read as Latin-1.
fn is_payload_byte(b: u8) -> bool {
    match b {
        0x00 | 0x09..=0x0D | 0x20..=0x7E | 0x85 => true,
        0xA0..=0xFF => b != 0xAD,
        _ => false,
    }
}
