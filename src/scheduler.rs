//! # Scan Scheduler
//!
//! Drives the scan loop: once per cycle every configured address is asked
//! for its serial number and a measurement, and the fresh readings are
//! handed to the [`Recorder`].
//!
//! ```text
//! Idle ──due?──► Waiting ──open──► ScanningAddress(0..n) ──► WritingResults ──close──► ScanComplete
//!   ▲                                                                                     │
//!   └─────────────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The minimum scan delay is checked by polling a monotonic clock every
//! [`Timing::poll_interval`]; it is a coarse timer, not a precise one.
//! A device that fails after all retries is skipped for the current cycle
//! only; its last complete reading is still handed to the recorder. A port
//! that cannot be opened abandons the cycle, which is retried on the next
//! tick without using up the scan budget.

use crate::bus::retry::{CommandKind, RetryController};
use crate::bus::session::{Device, DeviceSession, Timing};
use crate::bus::transport::{Connector, Transport};
use crate::config::Config;
use crate::constants::ADDRESS_MARKER;
use crate::error::BusError;
use crate::persistence::Recorder;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Represents the different states of the scan loop.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ScanState {
    Idle,
    Waiting,
    ScanningAddress(usize),
    WritingResults,
    ScanComplete,
}

/// Everything the scheduler needs to know from the configuration.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub device_path: String,
    pub addresses: Vec<u8>,
    pub min_scan_delay: Duration,
    /// `None` for unbounded
    pub scans: Option<u64>,
    pub max_retries: u32,
    pub timing: Timing,
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> Self {
        ScanSettings {
            device_path: config.serial_device.clone(),
            addresses: config.addresses.clone(),
            min_scan_delay: config.min_scan_delay(),
            scans: config.scan_budget(),
            max_retries: config.max_retries,
            timing: Timing::default(),
        }
    }
}

/// Summary of one completed scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Addresses that delivered a serial number and a measurement
    pub polled: Vec<u8>,
    /// Addresses given up on after retries
    pub skipped: Vec<u8>,
    pub recorded: usize,
    pub record_failures: usize,
}

/// Result of one scheduling tick.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The minimum scan delay has not yet elapsed; no I/O was done
    NotDue,
    /// The configured number of scans has been run
    BudgetExhausted,
    /// The port could not be opened
    Abandoned(BusError),
    Completed(ScanReport),
}

pub struct ScanScheduler<C, R> {
    connector: C,
    recorder: R,
    device_path: String,
    order: Vec<u8>,
    devices: BTreeMap<u8, Device>,
    retry: RetryController,
    min_scan_delay: Duration,
    remaining: Option<u64>,
    last_scan: Option<Instant>,
    state: ScanState,
}

impl<C, R> ScanScheduler<C, R>
where
    C: Connector,
    R: Recorder,
{
    pub fn new(connector: C, recorder: R, settings: ScanSettings) -> Self {
        let mut order = Vec::with_capacity(settings.addresses.len());
        let mut devices = BTreeMap::new();
        for configured in settings.addresses {
            let address = configured & !ADDRESS_MARKER;
            if devices.contains_key(&address) {
                warn!(
                    "address {} already polled as {}, polling it once",
                    configured, address
                );
                continue;
            }
            devices.insert(address, Device::new(address));
            order.push(address);
        }

        ScanScheduler {
            connector,
            recorder,
            device_path: settings.device_path,
            order,
            devices,
            retry: RetryController::new(DeviceSession::new(settings.timing), settings.max_retries),
            min_scan_delay: settings.min_scan_delay,
            remaining: settings.scans,
            last_scan: None,
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Scans still to run; `None` when unbounded.
    pub fn remaining_scans(&self) -> Option<u64> {
        self.remaining
    }

    pub fn device(&self, address: u8) -> Option<&Device> {
        self.devices.get(&address)
    }

    /// Devices in scan order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.order.iter().filter_map(|address| self.devices.get(address))
    }

    fn is_due(&self) -> bool {
        match self.last_scan {
            Some(last) => last.elapsed() >= self.min_scan_delay,
            None => true,
        }
    }

    /// Runs forever: scans whenever one is due and the budget allows,
    /// otherwise sleeps for the poll interval.
    pub async fn run(&mut self) {
        let poll_interval = self.retry.session().timing().poll_interval;
        let mut idle_reported = false;

        loop {
            match self.run_once().await {
                CycleOutcome::Completed(_) => {}
                CycleOutcome::BudgetExhausted => {
                    if !idle_reported {
                        info!("all configured scans done, idling");
                        idle_reported = true;
                    }
                    tokio::time::sleep(poll_interval).await;
                }
                CycleOutcome::NotDue | CycleOutcome::Abandoned(_) => {
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    /// One scheduling tick: a full scan cycle if one is due, nothing otherwise.
    pub async fn run_once(&mut self) -> CycleOutcome {
        if self.remaining == Some(0) {
            self.state = ScanState::Idle;
            return CycleOutcome::BudgetExhausted;
        }
        if !self.is_due() {
            self.state = ScanState::Waiting;
            return CycleOutcome::NotDue;
        }

        let mut transport = match self.connector.open(&self.device_path).await {
            Ok(transport) => transport,
            Err(e) => {
                error!("scan abandoned: {}", e);
                self.state = ScanState::Idle;
                return CycleOutcome::Abandoned(e);
            }
        };
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }

        let session = *self.retry.session();
        session.flush(&mut transport).await;

        let mut report = ScanReport::default();
        for (index, &address) in self.order.iter().enumerate() {
            self.state = ScanState::ScanningAddress(index);
            let Some(device) = self.devices.get_mut(&address) else {
                continue;
            };

            match poll_device(&self.retry, &mut transport, device).await {
                Ok(()) => report.polled.push(address),
                Err(e) => {
                    warn!("address {} skipped: {}", address, e);
                    report.skipped.push(address);
                }
            }

            tokio::time::sleep(session.timing().device_pacing).await;
        }

        self.state = ScanState::WritingResults;
        for &address in &self.order {
            // never read completely so far
            let Some(reading) = self.devices.get(&address).and_then(Device::reading) else {
                continue;
            };
            match self
                .recorder
                .record(&reading.serial_number, &reading.value, reading.observed_at)
                .await
            {
                Ok(()) => report.recorded += 1,
                Err(e) => {
                    warn!(
                        "address {} SN {}: write failed with status {}: {}",
                        address,
                        reading.serial_number,
                        e.code(),
                        e
                    );
                    report.record_failures += 1;
                }
            }
        }

        if let Err(e) = transport.close().await {
            error!("failed to close {}: {}", self.device_path, e);
        }
        self.last_scan = Some(Instant::now());
        self.state = ScanState::ScanComplete;

        info!(
            "scan complete: {} polled, {} skipped, {} recorded",
            report.polled.len(),
            report.skipped.len(),
            report.recorded
        );
        if let Some(remaining) = self.remaining {
            debug!("{} scans left", remaining);
        }
        CycleOutcome::Completed(report)
    }
}

/// Serial number, then measurement. A missing serial number skips the device.
async fn poll_device<T>(
    retry: &RetryController,
    transport: &mut T,
    device: &mut Device,
) -> Result<(), BusError>
where
    T: Transport + ?Sized,
{
    retry.session().flush(transport).await;
    retry
        .execute(transport, device, CommandKind::SerialNumber)
        .await?;
    retry
        .execute(transport, device, CommandKind::Measurement)
        .await?;
    Ok(())
}
