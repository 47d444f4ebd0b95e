//! # tempreg - Temperature Transmitter Registration over a Serial Bus
//!
//! The tempreg crate polls a set of temperature transmitters on a half-duplex
//! multidrop serial bus. Each scan asks every configured address for its
//! serial number and its current measurement and hands the readings to a
//! recorder, usually a PostgreSQL database.
//!
//! ## Features
//!
//! - Encode request frames and decode response frames with BCC checking
//! - Retry each command with NAK/ACK classification and per-device counters
//! - Scan addresses on a schedule with a minimum delay and an optional scan budget
//! - Record readings through the [`Recorder`] trait (PostgreSQL, log, in-memory)
//! - Load the legacy `key = "value"` configuration file
//! - Support for logging and error handling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tempreg::{Config, LogRecorder, ScanScheduler, ScanSettings, SerialConfig, SerialConnector};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("tempreg.cfg")?;
//! let connector = SerialConnector::new(SerialConfig::default());
//! let mut scheduler = ScanScheduler::new(connector, LogRecorder, ScanSettings::from_config(&config));
//! scheduler.run().await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod constants;
pub mod error;
pub mod lockfile;
pub mod logging;
pub mod persistence;
pub mod scheduler;

pub use crate::config::{Config, ConfigError, DatabaseConfig};
pub use crate::error::BusError;
pub use crate::lockfile::{LockError, LockFile};
pub use crate::logging::{init_logger, parse_log_level};

pub use bus::{CommandKind, Connector, Device, DeviceSession, RetryController, Timing, Transport};
pub use bus::{SerialConfig, SerialConnector};
pub use persistence::{LogRecorder, MemoryRecorder, RecordError, Recorder};
pub use scheduler::{CycleOutcome, ScanReport, ScanScheduler, ScanSettings, ScanState};

#[cfg(feature = "postgres")]
pub use persistence::PostgresRecorder;
