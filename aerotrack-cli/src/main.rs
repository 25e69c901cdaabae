//! aerotrack daemon entry point.
//!
//! Loads the JSON config, applies CLI overrides, optionally launches a
//! local dump1090 with networking enabled, and runs the service until
//! SIGINT/SIGTERM.

mod error;

use std::process::{Child, Command, Stdio};
use std::time::Duration;

use clap::Parser;
use error::CliError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aerotrack::config::Config;

#[derive(Debug, Parser)]
#[command(name = "aerotrack")]
#[command(version = aerotrack::VERSION)]
#[command(about = "Real-time ADS-B decode-and-track daemon", long_about = None)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, default_value = "config.json")]
    config: String,

    /// Feed host (overrides config)
    #[arg(long)]
    sbs_host: Option<String>,

    /// Feed port (overrides config)
    #[arg(long)]
    sbs_port: Option<u16>,

    /// Feed format: sbs or beast (overrides config)
    #[arg(long)]
    feed_format: Option<String>,

    /// HTTP listen address (overrides config)
    #[arg(long)]
    http_addr: Option<String>,

    /// Aircraft staleness timeout, e.g. 60s (overrides config)
    #[arg(long)]
    stale_timeout: Option<String>,

    /// RTL-SDR device index passed to dump1090 (overrides config)
    #[arg(long)]
    device_index: Option<i32>,

    /// Receiver latitude for distance/bearing (overrides config)
    #[arg(long)]
    rx_lat: Option<f64>,

    /// Receiver longitude for distance/bearing (overrides config)
    #[arg(long, allow_hyphen_values = true)]
    rx_lon: Option<f64>,

    /// Run without a database connection
    #[arg(long)]
    no_db: bool,

    /// Launch dump1090 with networking enabled before connecting
    #[arg(long)]
    start_dump1090: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "aerotrack=info,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

#[tokio::main]
async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = Config::load(&cli.config).map_err(CliError::Config)?;
    apply_overrides(&mut config, &cli);

    // The Beast protocol lives on a different default port; only adjust
    // when the operator has not chosen a port explicitly.
    if config.feed_format == "beast" && cli.sbs_port.is_none() && config.sbs_port == 30003 {
        config.sbs_port = 30005;
    }

    let mut dump1090 = None;
    if cli.start_dump1090 {
        dump1090 = start_dump1090(config.device_index, config.sbs_port, &config.feed_format);
        if dump1090.is_some() {
            // Give the decoder a moment to open its network ports.
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let result = aerotrack::service::run(config, cli.no_db, shutdown).await;

    if let Some(mut child) = dump1090 {
        info!("Stopping dump1090");
        let _ = child.kill();
        let _ = child.wait();
    }

    result.map_err(CliError::Service)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(host) = &cli.sbs_host {
        config.sbs_host = host.clone();
    }
    if let Some(port) = cli.sbs_port {
        config.sbs_port = port;
    }
    if let Some(format) = &cli.feed_format {
        config.feed_format = format.clone();
    }
    if let Some(addr) = &cli.http_addr {
        config.http_addr = addr.clone();
    }
    if let Some(timeout) = &cli.stale_timeout {
        config.stale_timeout = timeout.clone();
    }
    if let Some(index) = cli.device_index {
        config.device_index = index;
    }
    if let Some(lat) = cli.rx_lat {
        config.rx_lat = lat;
    }
    if let Some(lon) = cli.rx_lon {
        config.rx_lon = lon;
    }
}

/// Launch dump1090 feeding the configured port. Failure to start is not
/// fatal; the feed client will keep retrying against whatever decoder
/// the operator runs by hand.
fn start_dump1090(device_index: i32, port: u16, feed_format: &str) -> Option<Child> {
    let port_flag = if feed_format == "beast" {
        "--net-bo-port"
    } else {
        "--net-sbs-port"
    };

    let result = Command::new("dump1090")
        .arg("--device-index")
        .arg(device_index.to_string())
        .arg("--net")
        .arg("--quiet")
        .arg(port_flag)
        .arg(port.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match result {
        Ok(child) => {
            info!(pid = child.id(), port, format = feed_format, "Started dump1090");
            Some(child)
        }
        Err(e) => {
            warn!(error = %e, "Failed to start dump1090 (is it installed and in PATH?)");
            None
        }
    }
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt");
        }
        shutdown.cancel();
    });
}
