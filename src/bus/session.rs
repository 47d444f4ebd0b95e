//! # Device Session
//!
//! One request/response exchange with one transmitter, and the per-device
//! record the exchanges update.

use crate::bus::frame::{decode_response, encode_request, Response};
use crate::bus::transport::Transport;
use crate::constants::{DEVICE_PACING, POLL_INTERVAL, READ_TIMEOUT, SETTLE_INTERVAL};
use crate::error::BusError;
use chrono::{DateTime, Local};
use log::{debug, trace};
use std::time::Duration;

/// Delays used by the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Wait between sending a request and reading the reply
    pub settle: Duration,
    /// Timeout of a single receive
    pub read_timeout: Duration,
    /// Pause after each device of a scan
    pub device_pacing: Duration,
    /// Re-check interval of the scheduler
    pub poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            settle: SETTLE_INTERVAL,
            read_timeout: READ_TIMEOUT,
            device_pacing: DEVICE_PACING,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Message counters of one device, monotonic for the process lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub sent: u64,
    pub received: u64,
    pub nak: u64,
}

/// A complete reading, as handed to a recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub serial_number: String,
    pub value: String,
    pub observed_at: DateTime<Local>,
}

/// State kept for one bus address.
#[derive(Debug, Clone)]
pub struct Device {
    address: u8,
    serial_number: Option<String>,
    value: Option<String>,
    observed_at: Option<DateTime<Local>>,
    pub(crate) counters: Counters,
}

impl Device {
    pub fn new(address: u8) -> Self {
        Device {
            address,
            serial_number: None,
            value: None,
            observed_at: None,
            counters: Counters::default(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn observed_at(&self) -> Option<DateTime<Local>> {
        self.observed_at
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// The last serial number, measurement and timestamp, if all are known.
    pub fn reading(&self) -> Option<Reading> {
        Some(Reading {
            serial_number: self.serial_number.clone()?,
            value: self.value.clone()?,
            observed_at: self.observed_at?,
        })
    }

    pub(crate) fn set_serial_number(&mut self, serial_number: String) {
        self.serial_number = Some(serial_number);
    }

    pub(crate) fn set_measurement(&mut self, value: String, observed_at: DateTime<Local>) {
        self.value = Some(value);
        self.observed_at = Some(observed_at);
    }
}

/// Executes single exchanges on the bus. Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceSession {
    timing: Timing,
}

impl DeviceSession {
    pub fn new(timing: Timing) -> Self {
        DeviceSession { timing }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Sends `command` to `device`, waits the settle interval and reads one reply.
    pub async fn query<T>(
        &self,
        transport: &mut T,
        device: &mut Device,
        command: &str,
    ) -> Result<Response, BusError>
    where
        T: Transport + ?Sized,
    {
        debug!("query address {} {:?}", device.address, command);

        let frame = encode_request(command, device.address)?;
        transport.send(&frame).await?;
        device.counters.sent += 1;

        tokio::time::sleep(self.timing.settle).await;

        let raw = transport.receive(self.timing.read_timeout).await?;
        let response = decode_response(&raw)?;
        device.counters.received += 1;

        Ok(response)
    }

    /// One read without a request; whatever comes back is dropped.
    pub async fn flush<T>(&self, transport: &mut T)
    where
        T: Transport + ?Sized,
    {
        match transport.receive(self.timing.read_timeout).await {
            Ok(stale) => debug!("discarded {} stale bytes", stale.len()),
            Err(e) => trace!("flush read: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::serial_mock::{Reply, SimulatedBus};
    use crate::bus::transport::Connector;
    use crate::constants::{ACK, NAK};

    fn fast() -> DeviceSession {
        DeviceSession::new(Timing {
            settle: Duration::ZERO,
            read_timeout: Duration::ZERO,
            device_pacing: Duration::ZERO,
            poll_interval: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_query_counts_sent_and_received() {
        let bus = SimulatedBus::new();
        bus.script(7, "MEA CH 1 ?", [Reply::ack("19.25")]);
        let mut transport = bus.open("sim").await.unwrap();
        let mut device = Device::new(7);

        let response = fast()
            .query(&mut transport, &mut device, "MEA CH 1 ?")
            .await
            .unwrap();

        assert_eq!(response.status, ACK);
        assert_eq!(response.payload, "19.25");
        assert_eq!(device.counters(), Counters { sent: 1, received: 1, nak: 0 });
    }

    #[tokio::test]
    async fn test_timeout_counts_only_sent() {
        let bus = SimulatedBus::new();
        let mut transport = bus.open("sim").await.unwrap();
        let mut device = Device::new(7);

        let result = fast().query(&mut transport, &mut device, "SN ?").await;

        assert!(matches!(result, Err(BusError::Timeout)));
        assert_eq!(device.counters(), Counters { sent: 1, received: 0, nak: 0 });
    }

    #[tokio::test]
    async fn test_checksum_failure_is_not_received() {
        let bus = SimulatedBus::new();
        bus.script(7, "SN ?", [Reply::corrupted(NAK, "")]);
        let mut transport = bus.open("sim").await.unwrap();
        let mut device = Device::new(7);

        let result = fast().query(&mut transport, &mut device, "SN ?").await;

        assert!(matches!(result, Err(BusError::ChecksumMismatch { .. })));
        assert_eq!(device.counters().received, 0);
    }

    #[tokio::test]
    async fn test_overflow_sends_nothing() {
        let bus = SimulatedBus::new();
        let mut transport = bus.open("sim").await.unwrap();
        let mut device = Device::new(7);
        let command = "X".repeat(3000);

        let result = fast().query(&mut transport, &mut device, &command).await;

        assert!(matches!(result, Err(BusError::EncodingOverflow { .. })));
        assert_eq!(device.counters().sent, 0);
        assert!(bus.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_waits_settle_interval() {
        let bus = SimulatedBus::new();
        bus.script(1, "SN ?", [Reply::ack("SN1")]);
        let mut transport = bus.open("sim").await.unwrap();
        let mut device = Device::new(1);

        let start = tokio::time::Instant::now();
        DeviceSession::default()
            .query(&mut transport, &mut device, "SN ?")
            .await
            .unwrap();
        assert!(start.elapsed() >= SETTLE_INTERVAL);
    }

    #[tokio::test]
    async fn test_flush_swallows_everything() {
        let bus = SimulatedBus::new();
        bus.leave_stale(&[0x15]);
        let mut transport = bus.open("sim").await.unwrap();

        fast().flush(&mut transport).await;
        fast().flush(&mut transport).await;
        assert!(bus.requests().is_empty());
    }

    #[test]
    fn test_reading_requires_all_fields() {
        let mut device = Device::new(2);
        assert!(device.reading().is_none());

        device.set_serial_number("SN002".into());
        assert!(device.reading().is_none());

        let now = Local::now();
        device.set_measurement("20.1".into(), now);
        let reading = device.reading().unwrap();
        assert_eq!(reading.serial_number, "SN002");
        assert_eq!(reading.value, "20.1");
        assert_eq!(reading.observed_at, now);
    }
}
