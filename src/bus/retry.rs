//! # Retry Controller
//!
//! Wraps a [`DeviceSession`] exchange in a bounded retry loop.
//!
//! Every attempt is classified into an [`AttemptState`]:
//!
//! - `Succeeded` – the response satisfies the command's success predicate
//! - `Naked` – the device answered NAK; the NAK counter is bumped, retry
//! - `Attempting` – timeout, bad BCC or an unaccepted status; retry
//! - `Failed` – the request cannot be built; give up immediately
//!
//! When the attempts run out the controller ends in `ExhaustedRetries` and
//! reports [`BusError::RetriesExhausted`]. Device readings are only written
//! on success.

use crate::bus::frame::Response;
use crate::bus::session::{Device, DeviceSession};
use crate::bus::transport::Transport;
use crate::constants::{ACK, CMD_MEASUREMENT, CMD_SERIAL_NUMBER, DEFAULT_MAX_RETRIES, NAK};
use crate::error::BusError;
use chrono::Local;
use log::{debug, warn};

/// The two commands issued to every transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SerialNumber,
    Measurement,
}

impl CommandKind {
    pub fn command(&self) -> &'static str {
        match self {
            CommandKind::SerialNumber => CMD_SERIAL_NUMBER,
            CommandKind::Measurement => CMD_MEASUREMENT,
        }
    }

    /// Success predicate on the response status byte.
    ///
    /// A serial number is taken from any reply that is not a NAK, a
    /// measurement only from an explicit ACK.
    pub fn accepts(&self, status: u8) -> bool {
        match self {
            CommandKind::SerialNumber => status != NAK,
            CommandKind::Measurement => status == ACK,
        }
    }
}

/// States of a single command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Attempting,
    Succeeded,
    Naked,
    Failed,
    ExhaustedRetries,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded | AttemptState::Failed | AttemptState::ExhaustedRetries
        )
    }
}

/// Maps the outcome of one attempt to the next state.
pub fn classify(kind: CommandKind, outcome: &Result<Response, BusError>) -> AttemptState {
    match outcome {
        Ok(response) if kind.accepts(response.status) => AttemptState::Succeeded,
        Ok(response) if response.status == NAK => AttemptState::Naked,
        Ok(_) => AttemptState::Attempting,
        Err(e) if e.is_retryable() => AttemptState::Attempting,
        Err(_) => AttemptState::Failed,
    }
}

fn into_error(address: u8, outcome: Result<Response, BusError>) -> BusError {
    match outcome {
        Err(e) => e,
        Ok(response) => BusError::UnexpectedStatus {
            address,
            status: response.status,
        },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    session: DeviceSession,
    max_retries: u32,
}

impl Default for RetryController {
    fn default() -> Self {
        RetryController::new(DeviceSession::default(), DEFAULT_MAX_RETRIES)
    }
}

impl RetryController {
    /// `max_retries` is the total number of attempts; at least one is made.
    pub fn new(session: DeviceSession, max_retries: u32) -> Self {
        RetryController {
            session,
            max_retries: max_retries.max(1),
        }
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Runs `kind` against `device` until it succeeds or the attempts run out.
    pub async fn execute<T>(
        &self,
        transport: &mut T,
        device: &mut Device,
        kind: CommandKind,
    ) -> Result<Response, BusError>
    where
        T: Transport + ?Sized,
    {
        let address = device.address();
        let mut last = None;

        for attempt in 1..=self.max_retries {
            let outcome = self.session.query(transport, device, kind.command()).await;

            match classify(kind, &outcome) {
                AttemptState::Succeeded => {
                    let response = outcome?;
                    self.apply(device, kind, &response);
                    return Ok(response);
                }
                AttemptState::Naked => {
                    device.counters.nak += 1;
                    let counters = device.counters();
                    debug!(
                        "NAK from address {} (attempt {}/{}, TX {} RX {} NAK {})",
                        address, attempt, self.max_retries, counters.sent, counters.received, counters.nak
                    );
                    last = Some(BusError::NegativeAcknowledge(address));
                }
                AttemptState::Failed => {
                    let error = into_error(address, outcome);
                    warn!("{:?} at address {} failed: {}", kind, address, error);
                    return Err(error);
                }
                _ => {
                    let error = into_error(address, outcome);
                    debug!(
                        "{:?} at address {} attempt {}/{}: {}",
                        kind, address, attempt, self.max_retries, error
                    );
                    last = Some(error);
                }
            }
        }

        debug!("{:?} at address {}: {:?}", kind, address, AttemptState::ExhaustedRetries);
        Err(BusError::RetriesExhausted {
            address,
            attempts: self.max_retries,
            last: Box::new(last.unwrap_or(BusError::EmptyResponse)),
        })
    }

    fn apply(&self, device: &mut Device, kind: CommandKind, response: &Response) {
        match kind {
            CommandKind::SerialNumber => {
                debug!("address {} serial number {:?}", device.address(), response.payload);
                device.set_serial_number(response.payload.clone());
            }
            CommandKind::Measurement => {
                device.set_measurement(response.payload.clone(), Local::now());
                let counters = device.counters();
                debug!(
                    "address {} SN {:?} value {:?} (TX {} RX {} NAK {})",
                    device.address(),
                    device.serial_number().unwrap_or_default(),
                    response.payload,
                    counters.sent,
                    counters.received,
                    counters.nak
                );
            }
        }
    }
}
