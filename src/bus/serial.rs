//! # Serial Transport
//!
//! Opens the RS-485 line the transmitters hang on. The port is configured
//! for 19200 baud, 8 data bits, no parity and one stop bit.

use crate::bus::transport::{Connector, StreamTransport};
use crate::constants::{DEFAULT_BAUDRATE, READ_TIMEOUT};
use crate::error::BusError;
use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Configuration for serial connection.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baudrate: u32,
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baudrate: DEFAULT_BAUDRATE,
            timeout: READ_TIMEOUT,
        }
    }
}

/// Serial port transport.
pub type SerialTransport = StreamTransport<SerialStream>;

/// Opens [`SerialTransport`]s with a fixed line profile.
#[derive(Debug, Clone, Default)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        SerialConnector { config }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    type Transport = SerialTransport;

    async fn open(&self, path: &str) -> Result<SerialTransport, BusError> {
        let port = tokio_serial::new(path, self.config.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(self.config.timeout)
            .open_native_async()
            .map_err(|e| BusError::TransportOpen {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        debug!("opened {} at {} baud", path, self.config.baudrate);
        Ok(StreamTransport::new(port))
    }
}
