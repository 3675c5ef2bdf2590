//! Critical threshold monitor daemon.
//!
//! Watches `PropertiesChanged` signals on the sensor critical threshold
//! interface and requests a chassis power-off when a watched alarm asserts.
//! Runs until the bus connection fails, then exits non-zero so a supervisor
//! can restart it.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use threshold_monitor::config::{BusKind, MonitorConfig};
use threshold_monitor::monitor::{self, MonitorPipeline, WatchRegistry, WatchedEntity};
use threshold_monitor::transport::dbus::{DbusStateController, DbusTransport};
use threshold_monitor::transport::memory::DryRunController;
use threshold_monitor::transport::StateController;
use threshold_monitor::{MonitorError, MonitorResult};

#[derive(Parser, Debug)]
#[command(name = "threshold-monitor", version, about)]
struct Args {
    /// Connect to the session bus instead of the system bus
    #[arg(long)]
    session: bool,

    /// Sensor to watch as PATH=THRESHOLDS, e.g.
    /// /xyz/openbmc_project/sensors/temperature/Temp1=high,low.
    /// Replaces the built-in sensor table when given.
    #[arg(long = "watch", value_name = "PATH=THRESHOLDS")]
    watches: Vec<WatchedEntity>,

    /// Timeout for the power transition call, in milliseconds
    #[arg(long, value_name = "MS")]
    call_timeout_ms: Option<u64>,

    /// Log the power transition request instead of sending it
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn into_config(self) -> MonitorResult<MonitorConfig> {
        let mut config = MonitorConfig::default();
        if self.session {
            config.bus = BusKind::Session;
        }
        if !self.watches.is_empty() {
            config.registry = WatchRegistry::new(self.watches)?;
        }
        if let Some(ms) = self.call_timeout_ms {
            config.call_timeout = Duration::from_millis(ms);
        }
        config.dry_run = self.dry_run;
        Ok(config)
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("threshold_monitor={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn serve<C: StateController>(config: &MonitorConfig, controller: C) -> MonitorError {
    let mut transport = match DbusTransport::connect(config.bus) {
        Ok(transport) => transport,
        Err(err) => return MonitorError::TransportConnect(err),
    };
    let pipeline = MonitorPipeline::from_config(config, controller);
    monitor::run(&mut transport, &pipeline)
}

fn start(config: &MonitorConfig) -> MonitorError {
    for entity in config.registry.iter() {
        let properties: Vec<&str> = entity.watched_properties().collect();
        info!(sensor = entity.identifier(), ?properties, "watching sensor");
    }

    if config.dry_run {
        info!("dry run: transition requests will only be logged");
        return serve(config, DryRunController);
    }

    match DbusStateController::connect(config.bus, config.call_timeout) {
        Ok(controller) => serve(config, controller),
        Err(err) => MonitorError::TransportConnect(err),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        interface = %config.watched_interface,
        bus = ?config.bus,
        "starting threshold monitor"
    );

    // Only returns once the bus fails. The loop logs counters; the error is logged here.
    let err = start(&config);
    error!("{err}");
    ExitCode::FAILURE
}
