//! s3x-ws - WebSocket gateway
//!
//! Lets browser-based block editors reach device gateways over the bus.
//!
//! Usage:
//!   s3x-ws [--port 9000] [--bus-host localhost] [--bus-port 1883]

use std::net::{IpAddr, SocketAddr};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use s3x_bus::{create_bus, BusConfig, MqttConfig};
use s3x_ws::WsGateway;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BusKind {
    /// In-process broker (local testing only)
    Memory,
    /// MQTT broker
    Mqtt,
}

#[derive(Parser, Debug)]
#[command(name = "s3x-ws")]
#[command(version, about = "WebSocket gateway for s3x block editors")]
struct Args {
    /// WebSocket server port
    #[arg(short, long, env = "S3X_WS_PORT", default_value_t = 9000)]
    port: u16,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Bus transport
    #[arg(long, value_enum, default_value = "mqtt")]
    bus: BusKind,

    /// Bus broker host
    #[arg(long, env = "S3X_BUS_HOST", default_value = "localhost")]
    bus_host: String,

    /// Bus broker port
    #[arg(long, env = "S3X_BUS_PORT", default_value_t = 1883)]
    bus_port: u16,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "s3x_ws=debug,s3x_bus=debug"
    } else {
        "s3x_ws=info,s3x_bus=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer())
        .init();

    let bus_config = match args.bus {
        BusKind::Memory => BusConfig::Memory,
        BusKind::Mqtt => BusConfig::Mqtt(MqttConfig::new(args.bus_host.clone(), args.bus_port)),
    };
    let bus = create_bus(&bus_config)?;

    let handle = WsGateway::new(SocketAddr::new(args.bind, args.port), bus)
        .spawn()
        .await?;
    info!(address = %handle.local_addr(), "Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.shutdown().await
}
