mod args;
mod ble;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context as _, Result};
use args::Args;
use chrono::TimeDelta;
use clap::Parser as _;
use switchbot_relay::{
    config::Config,
    relay::{Relay, RelayOptions, close_sinks},
    sink::{ConsoleSink, HttpSink, MqttSink, Sink},
};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::ble::scanner::BleScanner;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    if let Err(e) = run().await {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

fn init_tracing() {
    // stdout carries the console sink.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path).context("failed to load configuration")?,
        None => {
            info!("no configuration file given, readings will only be printed");
            Config::default()
        }
    };

    let mut sinks = open_sinks(&config).await?;

    let scanner = match BleScanner::start(Duration::from_secs(args.scan_window), args.timezone)
        .await
    {
        Ok(scanner) => scanner,
        Err(e) => {
            close_sinks(&mut sinks).await;
            return Err(e).context("failed to start BLE scanner");
        }
    };

    let min_interval = i64::try_from(args.min_interval)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .context("--min-interval is out of range")?;

    let options = RelayOptions {
        mode: args.mode,
        on_sink_error: args.on_sink_error,
        min_interval,
        devices: args.devices,
        scan_retry_limit: Duration::from_secs(args.scan_retry_limit),
    };

    let mut relay = Relay::new(scanner, sinks, options);
    relay
        .run(shutdown_signal())
        .await
        .context("relay stopped with an error")?;

    Ok(())
}

/// HTTP, then MQTT, then the console.
async fn open_sinks(config: &Config) -> Result<Vec<Box<dyn Sink>>> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

    if let Some(api) = &config.api {
        let sink = HttpSink::new(api).context("failed to create HTTP client")?;
        info!(endpoint = %api.data_endpoint, "HTTP sink enabled");
        sinks.push(Box::new(sink));
    }

    if let Some(mqtt) = &config.mqtt {
        let sink = MqttSink::connect(mqtt).await.with_context(|| {
            format!("failed to connect to MQTT broker: {}:{}", mqtt.server, mqtt.port)
        })?;
        sinks.push(Box::new(sink));
    }

    sinks.push(Box::new(ConsoleSink::stdout()));

    Ok(sinks)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
