use clap::Parser;
use std::net::SocketAddr;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use switchbot_mhz19_exporter::app::{self, Options, RunError, SystemRadio};
use switchbot_mhz19_exporter::sink::PrometheusSink;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Start the metrics endpoint, then run the exporter until a shutdown signal.
///
/// A failure of the endpoint after startup stops the exporter as well.
async fn run(options: Options) -> Result<(), RunError> {
    let addr = SocketAddr::new(options.listen, options.port);
    let (sink, exporter) = PrometheusSink::with_http_listener(addr)?;
    info!(%addr, "serving metrics");

    tokio::select! {
        result = app::run(options, &SystemRadio, Arc::new(sink), app::shutdown_signal()) => result,
        result = exporter => {
            result?;
            Ok(())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!(error = %why, "exporter stopped");
            std::process::exit(EXIT_ERROR);
        }
    }
}
