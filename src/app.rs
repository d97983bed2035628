//! Core application runner (business logic) for `switchbot-mhz19-exporter`.
//!
//! This module is decoupled from CLI parsing, the metrics endpoint and process
//! exit codes so it can be tested deterministically with an injected radio and
//! metrics sink.

use crate::advertisement::Advertisement;
use crate::poller::{self, PollSchedule};
use crate::roster::{self, DeviceEntry, Roster, RosterError};
use crate::router::TelemetryRouter;
use crate::scanner::{Backend, ScanError};
use crate::serial::{self, ExchangeOptions};
use crate::sink::{MetricsError, MetricsSink};
use clap::Parser;
use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Command-line configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Port of the Prometheus metrics endpoint
    #[arg(short = 'p', long, default_value_t = 8000)]
    pub port: u16,

    /// Address the metrics endpoint listens on
    #[arg(long, default_value = "0.0.0.0")]
    pub listen: IpAddr,

    /// JSON file listing the thermometers to export.
    /// Format: [{"address": "AA:BB:CC:DD:EE:FF", "name": "Kitchen"}]
    #[arg(long = "devices", value_name = "PATH")]
    pub devices_file: Option<PathBuf>,

    /// Add a thermometer to the roster, after those from --devices.
    /// Format: --device AA:BB:CC:DD:EE:FF=Kitchen
    #[arg(long = "device", value_parser = roster::parse_device, value_name = "ADDR=NAME")]
    pub devices: Vec<DeviceEntry>,

    /// Serial device the CO2 sensor is attached to
    #[arg(long, default_value = "/dev/serial0")]
    pub serial_device: String,

    /// Do not poll the CO2 sensor
    #[arg(long)]
    pub no_co2: bool,

    /// How often to read the CO2 concentration.
    /// Accepts duration with suffix: 10s, 1m, 500ms, 2h.
    #[arg(long, default_value = "10s", value_parser = crate::duration::parse_interval)]
    pub co2_interval: Duration,

    /// How often to re-disable automatic baseline correction
    #[arg(long, default_value = "1h", value_parser = crate::duration::parse_interval)]
    pub abc_interval: Duration,

    /// Reject CO2 responses with a bad checksum
    #[arg(long)]
    pub strict_checksum: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Verbose output, log debug messages
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn poll_schedule(&self) -> PollSchedule {
        PollSchedule {
            read_interval: self.co2_interval,
            abc_interval: self.abc_interval,
        }
    }

    pub fn exchange_options(&self) -> ExchangeOptions {
        ExchangeOptions {
            verify_checksum: self.strict_checksum,
            ..ExchangeOptions::default()
        }
    }
}

/// Errors that stop the exporter.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error("advertisement stream ended unexpectedly")]
    ScanStopped,
}

/// Radio abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait RadioBackend: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Advertisement>, ScanError>> + Send + '_>>;
}

/// Real radio implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRadio;

impl RadioBackend for SystemRadio {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Advertisement>, ScanError>> + Send + '_>>
    {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// Build the roster from the roster file followed by `--device` entries.
pub fn load_roster(options: &Options) -> Result<Roster, RosterError> {
    let mut entries = match &options.devices_file {
        Some(path) => roster::load_file(path)?,
        None => Vec::new(),
    };
    entries.extend(options.devices.iter().cloned());

    let roster = Roster::from_entries(&entries)?;
    if roster.is_empty() {
        warn!("roster is empty, only CO2 will be exported");
    } else {
        info!(devices = roster.len(), "roster loaded");
    }
    Ok(roster)
}

/// Open the CO2 sensor and start polling it in the background.
///
/// A sensor that cannot be opened is not fatal: the CO2 series is marked
/// unknown and `None` is returned.
fn spawn_co2_poller(options: &Options, router: Arc<TelemetryRouter>) -> Option<JoinHandle<()>> {
    let client = match serial::open(&options.serial_device, options.exchange_options()) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "CO2 sensor unavailable, continuing without it");
            router.clear_co2();
            return None;
        }
    };
    info!(device = %options.serial_device, "CO2 sensor opened");

    let schedule = options.poll_schedule();
    Some(tokio::spawn(async move {
        poller::run(client, &router, schedule).await;
    }))
}

/// Run the exporter until `shutdown` resolves.
///
/// Loads the roster, starts the radio, spawns the CO2 poller unless disabled,
/// and feeds every advertisement through the router in delivery order.
pub async fn run(
    options: Options,
    radio: &dyn RadioBackend,
    sink: Arc<dyn MetricsSink>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RunError> {
    let roster = load_roster(&options)?;
    let router = Arc::new(TelemetryRouter::new(roster, sink));

    let mut advertisements = radio.start_scan(options.backend).await?;
    info!(backend = %options.backend, "scanning for advertisements");

    let poller = if options.no_co2 {
        info!("CO2 polling disabled");
        None
    } else {
        spawn_co2_poller(&options, router.clone())
    };

    let consume = async {
        while let Some(adv) = advertisements.recv().await {
            router.handle_advertisement(&adv);
        }
    };

    let result = tokio::select! {
        _ = consume => Err(RunError::ScanStopped),
        _ = shutdown => {
            info!("shutting down");
            Ok(())
        }
    };

    if let Some(handle) = poller {
        handle.abort();
    }
    result
}

/// Resolve on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
