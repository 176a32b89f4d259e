// DME Agent - Telemetry simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # DME Agent
//!
//! Simulated DME serving telemetry over a secured UDP transport and a plain
//! HTTP service.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: UDP 161, HTTP 5000, update every 180 s
//! dme-agent
//!
//! # Unprivileged ports, faster drift
//! dme-agent --snmp-port 1161 --http-port 8080 --update-interval 10
//! ```

use clap::Parser;
use dme_agent::{start, AgentConfig, Args};
use std::process::ExitCode;
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

    info!("DME Agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match AgentConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let agent = match start(config).await {
        Ok(agent) => agent,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    agent.shutdown();
    ExitCode::SUCCESS
}
