//! s3xd - s3x Gateway Daemon
//!
//! Bridges one hardware device to the message bus. The device family is
//! selected at start; everything else is shared by all families.
//!
//! Usage:
//!   s3xd [OPTIONS]
//!
//! Examples:
//!   # Simulated Arduino on a local MQTT broker
//!   s3xd --family arduino --mock
//!
//!   # ESP32 running the TCP firmware
//!   s3xd --family esp32 --address 192.168.1.40:31335
//!
//!   # Everything from a config file
//!   s3xd --config config/arduino.toml
//!
//! Exit codes: 0 after Ctrl+C, 2 when reconnecting gave up, 1 on setup errors.

mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use s3x_core::GatewayError;
use s3x_gateway::GatewaySupervisor;

use crate::cli::{Args, LogFormat};

const DEFAULT_FILTER: &str = "s3xd=info,s3x_gateway=info,s3x_device=info,s3x_bus=info";
const VERBOSE_FILTER: &str = "s3xd=debug,s3x_gateway=debug,s3x_device=debug,s3x_bus=debug";

fn init_tracing(args: &Args) {
    let default_filter = if args.verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    match args.log_format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.gateway_config()?;
    info!(
        family = %config.device.family,
        device = %config.device.device_id(),
        "Starting s3xd"
    );

    let supervisor = GatewaySupervisor::from_config(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    supervisor.run(shutdown_rx).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            match e.downcast_ref::<GatewayError>() {
                Some(GatewayError::RetryExhausted { .. }) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}
