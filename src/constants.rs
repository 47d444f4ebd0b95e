//! Bus Protocol Constants
//!
//! This module defines the framing bytes, buffer capacities and timing
//! values used by the transmitter bus protocol and the scan loop.

use std::time::Duration;

/// Positive acknowledge status byte
pub const ACK: u8 = 0x06;

/// Negative acknowledge status byte
pub const NAK: u8 = 0x15;

/// End-of-text marker terminating the payload of a frame
pub const ETX: u8 = 0x03;

/// Marker bit OR-ed into the address byte of a request frame
pub const ADDRESS_MARKER: u8 = 0x80;

/// Transmit buffer capacity (address + payload + ETX + BCC)
pub const TX_BUFFER_LEN: usize = 2200;

/// Receive buffer capacity for a single response read
pub const RX_BUFFER_LEN: usize = 255;

/// Maximum number of configured device addresses
pub const MAX_ADDRESSES: usize = 32;

/// Default number of attempts per command
pub const DEFAULT_MAX_RETRIES: u32 = 25;

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Serial number query
pub const CMD_SERIAL_NUMBER: &str = "SN ?";

/// Measurement query for channel 1
pub const CMD_MEASUREMENT: &str = "MEA CH 1 ?";

// ----------------------------------------------------------------------------
// Serial line profile
// ----------------------------------------------------------------------------

pub const DEFAULT_BAUDRATE: u32 = 19200;
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyUSB0";

// ----------------------------------------------------------------------------
// Timing
// ----------------------------------------------------------------------------

/// Delay between sending a command and reading the reply
pub const SETTLE_INTERVAL: Duration = Duration::from_millis(485);

/// Timeout of a single receive
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause between two devices within a scan
pub const DEVICE_PACING: Duration = Duration::from_millis(100);

/// Re-check interval while waiting for the next scan to become due
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

// ----------------------------------------------------------------------------
// Process files
// ----------------------------------------------------------------------------

pub const DEFAULT_CONFIG: &str = "tempreg.cfg";
pub const LOCK_FILE: &str = "tempreg.lck";
