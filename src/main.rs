//! DriftMQ - minimal MQTT v3.1.1 broker
//!
//! Usage:
//!   driftmq [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>       Configuration file path (TOML)
//!   -b, --bind <ADDR>         TCP bind address (default: 0.0.0.0:1883)
//!   --max-connections <N>     Maximum connections (0 = unlimited)
//!   --max-packet-size <N>     Maximum packet size in bytes
//!   -l, --log-level <LEVEL>   Log level (error, warn, info, debug, trace)
//!   -h, --help                Print help

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use driftmq::broker::{Broker, BrokerConfig};
use driftmq::config::Config;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// DriftMQ - minimal MQTT v3.1.1 broker
#[derive(Parser, Debug)]
#[command(name = "driftmq")]
#[command(author = "DriftMQ Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Minimal MQTT v3.1.1 broker core")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Maximum connections (0 = unlimited)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Maximum packet size in bytes
    #[arg(long)]
    max_packet_size: Option<usize>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("error loading config file: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let log_level = args.log_level.unwrap_or_else(|| {
        match file_config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("loaded configuration from {:?}", path);
    }

    let bind_addr = args.bind.unwrap_or(file_config.server.bind);
    let max_connections = args
        .max_connections
        .unwrap_or(file_config.limits.max_connections);
    let max_packet_size = args
        .max_packet_size
        .unwrap_or(file_config.limits.max_packet_size);

    let broker_config = BrokerConfig {
        bind_addr,
        max_connections,
        max_packet_size,
    };

    info!("starting DriftMQ broker");
    info!("  bind address: {}", broker_config.bind_addr);
    info!("  max connections: {}", broker_config.max_connections);
    info!("  max packet size: {} bytes", broker_config.max_packet_size);

    let broker = std::sync::Arc::new(Broker::new(broker_config));
    let run_broker = broker.clone();
    let mut run_handle = tokio::spawn(async move { run_broker.run().await });

    let run_result = tokio::select! {
        result = &mut run_handle => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("received Ctrl-C, shutting down");
            broker.stop();
            run_handle.await
        }
    };

    match run_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("bind failed: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("broker task panicked: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
