//! # Configuration
//!
//! Loads `tempreg.cfg`. The file holds one `key = "value"` assignment per
//! line; lines starting with `#` are comments. The address list may continue
//! over several lines until its closing quote:
//!
//! ```text
//! SerialDevice = "/dev/ttyUSB0"
//! scanAddresses = "1, 2, 3,
//!                  4, 5"
//! minScanDelaySeconds = "60"
//! numberOfScans = "0"
//! db.host = "localhost"
//! db.user = "tempreg"
//! db.passwd = "secret"
//! db.name = "measurements"
//! ```
//!
//! Unknown keys are ignored. Numbers that do not parse keep their defaults.
//! A missing or empty address list is an error.

use crate::constants::{ADDRESS_MARKER, DEFAULT_MAX_RETRIES, DEFAULT_SERIAL_DEVICE, MAX_ADDRESSES};
use log::warn;
use nom::bytes::complete::{tag, take_till, take_while1};
use nom::character::complete::{char, space0};
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no scan addresses configured")]
    NoAddresses,

    #[error("unterminated value for {0}")]
    Unterminated(String),
}

/// Database credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    #[serde(serialize_with = "redact")]
    pub password: String,
    pub name: String,
}

fn redact<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_empty() {
        serializer.serialize_str("")
    } else {
        serializer.serialize_str("********")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub serial_device: String,
    pub addresses: Vec<u8>,
    /// Minimum time between the start of two scans, 0 for none
    pub min_scan_delay_seconds: f64,
    /// Number of scans to run, 0 for unbounded
    pub number_of_scans: u64,
    pub max_retries: u32,
    /// `None` when no database host is configured
    pub database: Option<DatabaseConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            serial_device: DEFAULT_SERIAL_DEVICE.to_string(),
            addresses: Vec::new(),
            min_scan_delay_seconds: 60.0,
            number_of_scans: 1,
            max_retries: DEFAULT_MAX_RETRIES,
            database: None,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Config::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        let mut database = DatabaseConfig::default();
        let mut addresses = None;

        for (key, value) in assignments(text)? {
            match key.as_str() {
                "SerialDevice" => config.serial_device = value,
                "scanAddresses" => addresses = Some(value),
                "minScanDelaySeconds" => parse_number(&key, &value, &mut config.min_scan_delay_seconds),
                "numberOfScans" => parse_number(&key, &value, &mut config.number_of_scans),
                "maxRetries" => parse_number(&key, &value, &mut config.max_retries),
                "db.host" => database.host = value,
                "db.user" => database.user = value,
                "db.passwd" => database.password = value,
                "db.name" => database.name = value,
                _ => {}
            }
        }

        config.addresses = addresses
            .map(|list| parse_addresses(&list))
            .unwrap_or_default();
        if config.addresses.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        if config.serial_device.is_empty() {
            config.serial_device = DEFAULT_SERIAL_DEVICE.to_string();
        }
        if Duration::try_from_secs_f64(config.min_scan_delay_seconds).is_err() {
            warn!("ignoring minScanDelaySeconds {}", config.min_scan_delay_seconds);
            config.min_scan_delay_seconds = Config::default().min_scan_delay_seconds;
        }
        if !database.host.is_empty() {
            config.database = Some(database);
        }

        Ok(config)
    }

    /// Saturates at [`Duration::MAX`] for values no `Duration` can hold.
    pub fn min_scan_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_scan_delay_seconds).unwrap_or(Duration::MAX)
    }

    /// `None` for an unbounded number of scans.
    pub fn scan_budget(&self) -> Option<u64> {
        match self.number_of_scans {
            0 => None,
            n => Some(n),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str, target: &mut T) {
    match value.trim().parse() {
        Ok(v) => *target = v,
        Err(_) => warn!("ignoring {} = {:?}", key, value),
    }
}

/// Extracts the address bytes from a list like `"1, 2,3"`.
///
/// Characters other than digits, commas and spaces are dropped, only the
/// first [`MAX_ADDRESSES`] entries are looked at and entries that are not a
/// number in 0..=255 are skipped. Addresses above 127 collide with the
/// address marker bit on the wire and are kept with a warning.
pub fn parse_addresses(list: &str) -> Vec<u8> {
    let cleaned: String = list
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == ' ')
        .collect();

    cleaned
        .split(',')
        .take(MAX_ADDRESSES)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse::<u8>() {
            Ok(address) => {
                if address & ADDRESS_MARKER != 0 {
                    warn!(
                        "scan address {} is sent as {}",
                        address,
                        address & !ADDRESS_MARKER
                    );
                }
                Some(address)
            }
            Err(_) => {
                warn!("ignoring scan address {:?}", part);
                None
            }
        })
        .collect()
}

/// Splits the file into `(key, value)` pairs, joining continuation lines.
fn assignments(text: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut pairs = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut statement = line.to_string();
        if line.matches('"').count() == 1 {
            loop {
                match lines.next() {
                    Some(next) => {
                        statement.push_str(next);
                        if next.contains('"') {
                            break;
                        }
                    }
                    None => {
                        let key = trimmed.split('=').next().unwrap_or(trimmed).trim();
                        return Err(ConfigError::Unterminated(key.to_string()));
                    }
                }
            }
        }

        match assignment(&statement) {
            Ok((_, (key, value))) => pairs.push((key.to_string(), value.to_string())),
            Err(_) => warn!("ignoring config line {:?}", trimmed),
        }
    }

    Ok(pairs)
}

/// `key = "value"`
fn assignment(input: &str) -> IResult<&str, (&str, &str)> {
    let key = preceded(
        space0,
        take_while1(|c: char| !c.is_whitespace() && c != '='),
    );
    let equals = tuple((space0, tag("="), space0));
    let value = delimited(char('"'), take_till(|c: char| c == '"'), char('"'));

    tuple((key, equals, value))(input).map(|(rest, (key, _, value))| (rest, (key, value)))
}
