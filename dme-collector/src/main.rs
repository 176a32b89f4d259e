// DME Collector - Telemetry collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # DME Collector
//!
//! Polls a DME agent and appends every reading to a durable log.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: agent dme_simulator, every 180 s, dme_data.csv
//! dme-collector
//!
//! # Local agent on unprivileged ports, forwarding to Logstash
//! dme-collector --snmp-host 127.0.0.1 --snmp-port 1161 --http-port 8080 \
//!     --logstash-enabled true --logstash-host localhost
//! ```

use clap::Parser;
use dme_collector::{build, Args, CollectorConfig};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("DME Collector v{}", env!("CARGO_PKG_VERSION"));

    let config = match CollectorConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let collector = match build(&config) {
        Ok(collector) => Arc::new(collector),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        agent = %config.agent_host,
        secure_port = config.secure_port,
        http_port = config.http_port,
        max_retries = config.max_retries,
        "polling agent"
    );

    tokio::select! {
        _ = Arc::clone(&collector).run(config.interval) => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        }
    }

    let stats = collector.stats().snapshot();
    info!(
        completed = stats.completed,
        abandoned = stats.abandoned,
        degraded = stats.degraded,
        fallbacks = stats.fallbacks,
        "Shutting down"
    );
    ExitCode::SUCCESS
}
