use log::{trace, LevelFilter};

/// Initializes the logger with the `env_logger` crate.
///
/// `level` is the default filter; `RUST_LOG` still overrides it.
pub fn init_logger(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}

/// Maps a `--log-level` argument to a filter. Unknown names fall back to info.
pub fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Hex dump of a frame at trace level
pub fn log_frame_hex(label: &str, data: &[u8]) {
    if log::log_enabled!(log::Level::Trace) {
        trace!("{} [{} bytes]: {}", label, data.len(), hex::encode_upper(data));
    }
}
