// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RDMnet Broker
//!
//! A many-to-many routing hub for RDMnet (ANSI E1.33): controllers and
//! devices establish persistent TCP sessions to it, exchange identification
//! in a handshake, and the broker routes encapsulated RDM request/response
//! messages between them.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default RDMnet port (8888) with the default scope
//! rdmnet-broker
//!
//! # Custom scope, listen address, and config file
//! rdmnet-broker --scope backstage --listen 10.0.0.5 --config broker.json
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rdmnet_broker::config::BrokerConfig;
use rdmnet_broker::Broker;

/// RDMnet broker: routes RPT traffic between controllers and devices within a scope.
#[derive(Parser, Debug)]
#[command(name = "rdmnet-broker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RDMnet scope this broker serves
    #[arg(long, default_value_t = rdmnet_core::ids::DEFAULT_SCOPE.to_string())]
    scope: String,

    /// Address to listen on; may be repeated for multiple interfaces
    #[arg(long = "listen", default_value = "0.0.0.0")]
    listen: Vec<IpAddr>,

    /// TCP port to listen on (0 = OS-assigned, only valid with one --listen)
    #[arg(short, long, default_value_t = rdmnet_core::config::DEFAULT_PORT)]
    port: u16,

    /// Configuration file (JSON format); overrides the other flags when given
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value_t = 20)]
    max_controllers: usize,

    #[arg(long, default_value_t = 2000)]
    max_devices: usize,
}

fn init_tracing(log_level: &str) {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&args.log_level);

    let config = if let Some(path) = &args.config {
        info!(?path, "loading config from file");
        match BrokerConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        BrokerConfig {
            scope: args.scope,
            listen_addrs: args.listen,
            port: args.port,
            max_controllers: args.max_controllers,
            max_devices: args.max_devices,
            ..Default::default()
        }
    };

    info!("+----------------------------------------------------+");
    info!("|              RDMnet Broker v{}                 |", env!("CARGO_PKG_VERSION"));
    info!("+----------------------------------------------------+");
    info!("|  Scope: {:41} |", config.scope);
    info!("|  Port:  {:41} |", config.port);
    info!("+----------------------------------------------------+");

    let broker = match Broker::new(config) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("failed to start broker: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown_handle = broker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received, stopping broker");
        shutdown_handle.shutdown();
    });

    if let Err(e) = broker.run().await {
        eprintln!("broker stopped with error: {e}");
        return ExitCode::FAILURE;
    }

    info!("broker stopped");
    ExitCode::SUCCESS
}
