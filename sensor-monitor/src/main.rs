use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use fern::Dispatch;
use framescope_ipc::contract::DEFAULT_SENSOR_CHANNEL;
use framescope_ipc::IpcClient;
use framescope_sensors::{Monitor, MonitorOptions, SystemSource};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "framescope-sensors")]
#[command(about = "Streams hardware sensor readings to the framescope host")]
struct Cli {
    /// Sensor channel served by the host
    #[arg(long, default_value = DEFAULT_SENSOR_CHANNEL)]
    channel: String,

    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    #[arg(long, default_value = "sensors_log.txt")]
    log_file: PathBuf,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Wait for the sampling thread after Stop before giving up on it
    #[arg(long, default_value_t = 10_000)]
    stop_timeout_ms: u64,

    /// Wait for the host's channel to appear
    #[arg(long, default_value_t = 10_000)]
    connect_timeout_ms: u64,
}

fn setup_logging(level: LevelFilter, log_file: &Path) -> Result<(), fern::InitError> {
    Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}] {}",
                Utc::now().to_rfc3339(),
                record.level(),
                record.target(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .chain(fern::log_file(log_file)?)
        .apply()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level, &cli.log_file).context("failed to set up logging")?;

    let client = IpcClient::connect(&cli.channel, Duration::from_millis(cli.connect_timeout_ms))
        .with_context(|| format!("failed to connect to sensor channel '{}'", cli.channel))?;
    let client = Arc::new(client);
    log::info!("connected to '{}'", cli.channel);

    let options = MonitorOptions {
        interval: Duration::from_millis(cli.interval_ms),
        stop_timeout: Duration::from_millis(cli.stop_timeout_ms),
    };
    let mut monitor = Monitor::new(SystemSource::new(), Arc::clone(&client), options);
    monitor.run(&*client).context("sensor monitor failed")?;

    log::info!("cleanup complete");
    Ok(())
}
