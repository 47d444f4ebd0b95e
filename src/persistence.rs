//! # Reading Persistence
//!
//! Recorders receive one `(serial number, value, timestamp)` triple per
//! device and scan. A failed write is reported through [`RecordError`] and
//! never stops the scan loop.
//!
//! - [`PostgresRecorder`] writes into the `channel`/`data` tables
//! - [`LogRecorder`] only logs, used when no database is configured
//! - [`MemoryRecorder`] keeps readings in memory for tests

use crate::bus::session::Reading;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Reasons a reading could not be recorded.
///
/// [`RecordError::code`] returns the numeric status used in log lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("channel lookup failed: {0}")]
    Lookup(String),

    #[error("no channel for serial number {0:?}")]
    UnknownDevice(String),

    #[error("channel status update failed: {0}")]
    StatusUpdate(String),

    #[error("data write failed: {0}")]
    Write(String),
}

impl RecordError {
    pub fn code(&self) -> u8 {
        match self {
            RecordError::Connection(_) => 1,
            RecordError::Lookup(_) => 2,
            RecordError::UnknownDevice(_) => 3,
            RecordError::StatusUpdate(_) => 4,
            RecordError::Write(_) => 5,
        }
    }
}

/// Sink for completed readings.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record(
        &self,
        serial_number: &str,
        value: &str,
        observed_at: DateTime<Local>,
    ) -> Result<(), RecordError>;
}

#[async_trait]
impl<R: Recorder + ?Sized> Recorder for Box<R> {
    async fn record(
        &self,
        serial_number: &str,
        value: &str,
        observed_at: DateTime<Local>,
    ) -> Result<(), RecordError> {
        (**self).record(serial_number, value, observed_at).await
    }
}

/// Values with these prefixes are device status codes, not measurements.
pub const STATUS_PREFIXES: [&str; 3] = ["100001", "100002", "100003"];

/// Whether `value` is a device status code rather than a measurement.
pub fn is_status_value(value: &str) -> bool {
    STATUS_PREFIXES.iter().any(|p| value.starts_with(p))
}

/// Formats a timestamp the way the `data.datetime` column expects it.
pub fn format_datetime(t: &DateTime<Local>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Writes readings to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRecorder;

#[async_trait]
impl Recorder for LogRecorder {
    async fn record(
        &self,
        serial_number: &str,
        value: &str,
        observed_at: DateTime<Local>,
    ) -> Result<(), RecordError> {
        info!(
            "reading SN {} value {} at {}",
            serial_number,
            value,
            format_datetime(&observed_at)
        );
        Ok(())
    }
}

/// Keeps readings in memory; clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    readings: Arc<Mutex<Vec<Reading>>>,
    failures: Arc<Mutex<HashMap<String, RecordError>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write for `serial_number` fail with `error`.
    pub fn fail_for(&self, serial_number: &str, error: RecordError) {
        self.failures
            .lock()
            .unwrap()
            .insert(serial_number.to_string(), error);
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn record(
        &self,
        serial_number: &str,
        value: &str,
        observed_at: DateTime<Local>,
    ) -> Result<(), RecordError> {
        if let Some(error) = self.failures.lock().unwrap().get(serial_number) {
            return Err(error.clone());
        }
        self.readings.lock().unwrap().push(Reading {
            serial_number: serial_number.to_string(),
            value: value.to_string(),
            observed_at,
        });
        Ok(())
    }
}

#[cfg(feature = "postgres")]
pub use postgres::PostgresRecorder;

#[cfg(feature = "postgres")]
mod postgres {
    use super::{is_status_value, RecordError, Recorder};
    use crate::config::DatabaseConfig;
    use async_trait::async_trait;
    use chrono::{DateTime, Local};
    use log::debug;
    use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

    const CHANNEL_BY_SERIAL: &str = "SELECT channel.id FROM channel \
         LEFT JOIN unit ON channel.id_unit = unit.id \
         WHERE unit.serialnumber = $1";
    const UPDATE_STATUS: &str = "UPDATE channel SET status = $1 WHERE id = $2";
    const INSERT_DATA: &str = "INSERT INTO data (id_channel, datetime, value) VALUES ($1, $2, $3)";

    /// Records readings into PostgreSQL.
    ///
    /// The channel is looked up by the unit's serial number. Status values
    /// replace `channel.status`; measurements reset the status to `normal`
    /// and append a row to `data`.
    pub struct PostgresRecorder {
        pool: PgPool,
    }

    impl PostgresRecorder {
        /// Creates the recorder; no connection is made until the first write.
        pub fn new(config: &DatabaseConfig) -> Self {
            let options = PgConnectOptions::new()
                .host(&config.host)
                .username(&config.user)
                .password(&config.password)
                .database(&config.name);
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_lazy_with(options);
            PostgresRecorder { pool }
        }
    }

    #[async_trait]
    impl Recorder for PostgresRecorder {
        async fn record(
            &self,
            serial_number: &str,
            value: &str,
            observed_at: DateTime<Local>,
        ) -> Result<(), RecordError> {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| RecordError::Connection(e.to_string()))?;

            let channel = sqlx::query_scalar::<_, i32>(CHANNEL_BY_SERIAL)
                .bind(serial_number)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| RecordError::Lookup(e.to_string()))?
                .ok_or_else(|| RecordError::UnknownDevice(serial_number.to_string()))?;

            if is_status_value(value) {
                debug!("channel {} status {}", channel, value);
                sqlx::query(UPDATE_STATUS)
                    .bind(value)
                    .bind(channel)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| RecordError::Write(e.to_string()))?;
                return Ok(());
            }

            sqlx::query(UPDATE_STATUS)
                .bind("normal")
                .bind(channel)
                .execute(&mut *conn)
                .await
                .map_err(|e| RecordError::StatusUpdate(e.to_string()))?;

            sqlx::query(INSERT_DATA)
                .bind(channel)
                .bind(observed_at.naive_local())
                .bind(value)
                .execute(&mut *conn)
                .await
                .map_err(|e| RecordError::Write(e.to_string()))?;

            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_error_codes() {
        assert_eq!(RecordError::Connection("x".into()).code(), 1);
        assert_eq!(RecordError::Lookup("x".into()).code(), 2);
        assert_eq!(RecordError::UnknownDevice("SN".into()).code(), 3);
        assert_eq!(RecordError::StatusUpdate("x".into()).code(), 4);
        assert_eq!(RecordError::Write("x".into()).code(), 5);
    }

    #[test]
    fn test_status_values() {
        assert!(is_status_value("100003"));
        assert!(is_status_value("100001 sensor break"));
        assert!(!is_status_value("100004"));
        assert!(!is_status_value("23.5"));
    }

    #[test]
    fn test_format_datetime() {
        let t = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_datetime(&t), "2024-03-09 07:05:01");
    }

    #[tokio::test]
    async fn test_memory_recorder_failures() {
        let recorder = MemoryRecorder::new();
        recorder.fail_for("SN9", RecordError::UnknownDevice("SN9".into()));

        let now = Local::now();
        assert!(recorder.record("SN1", "1.0", now).await.is_ok());
        let err = recorder.record("SN9", "2.0", now).await.unwrap_err();
        assert_eq!(err.code(), 3);
        assert_eq!(recorder.readings().len(), 1);
    }

    #[tokio::test]
    async fn test_boxed_recorder() {
        let memory = MemoryRecorder::new();
        let boxed: Box<dyn Recorder> = Box::new(memory.clone());
        let now = Local::now();
        boxed.record("SN1", "4.2", now).await.unwrap();
        assert_eq!(
            memory.readings(),
            vec![Reading {
                serial_number: "SN1".into(),
                value: "4.2".into(),
                observed_at: now,
            }]
        );
    }
}
