use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use tempreg::constants::{DEFAULT_CONFIG, LOCK_FILE};
use tempreg::persistence::{LogRecorder, Recorder};
use tempreg::{
    init_logger, parse_log_level, Config, LockFile, ScanScheduler, ScanSettings, SerialConfig,
    SerialConnector,
};

#[derive(Parser)]
#[command(name = "tempreg")]
#[command(about = "Polls temperature transmitters on a serial bus and records their readings")]
struct Cli {
    /// Configuration file
    #[arg(default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// trace, debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value = LOCK_FILE)]
    lock_file: PathBuf,

    /// Overrides numberOfScans; 0 scans forever
    #[arg(long)]
    scans: Option<u64>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(parse_log_level(&cli.log_level));

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(scans) = cli.scans {
        config.number_of_scans = scans;
    }

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let _lock = LockFile::acquire(&cli.lock_file).context("single instance check")?;

    info!(
        "scanning {} device(s) on {}",
        config.addresses.len(),
        config.serial_device
    );

    let connector = SerialConnector::new(SerialConfig::default());
    let mut scheduler = ScanScheduler::new(
        connector,
        recorder(&config),
        ScanSettings::from_config(&config),
    );

    tokio::select! {
        _ = scheduler.run() => {}
        _ = shutdown_signal() => info!("shutdown signal received"),
    }

    for device in scheduler.devices() {
        let counters = device.counters();
        info!(
            "address {} SN {}: TX {} RX {} NAK {}",
            device.address(),
            device.serial_number().unwrap_or("-"),
            counters.sent,
            counters.received,
            counters.nak
        );
    }

    Ok(())
}

#[cfg(feature = "postgres")]
fn recorder(config: &Config) -> Box<dyn Recorder> {
    match &config.database {
        Some(database) => {
            info!("recording to database {} on {}", database.name, database.host);
            Box::new(tempreg::PostgresRecorder::new(database))
        }
        None => Box::new(LogRecorder),
    }
}

#[cfg(not(feature = "postgres"))]
fn recorder(config: &Config) -> Box<dyn Recorder> {
    if config.database.is_some() {
        warn!("database configured but postgres support is not compiled in");
    }
    Box::new(LogRecorder)
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => Some(term),
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = async {
                match term.as_mut() {
                    Some(term) => { term.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
