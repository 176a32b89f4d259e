// DME Collector - Telemetry collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration of the DME collector
//!
//! Every flag falls back to an environment variable, then to a default.

use crate::error::ConfigError;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use dme::security::{MAX_PRINCIPAL_LEN, MIN_SECRET_LEN};
use dme::TransportCredential;
use std::path::PathBuf;
use std::time::Duration;

/// DME telemetry collector
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host of the agent
    #[arg(long, env = "SNMP_HOST", default_value = "dme_simulator")]
    pub snmp_host: String,

    /// UDP port of the secured transport
    #[arg(long, env = "SNMP_PORT", default_value_t = 161)]
    pub snmp_port: u16,

    /// TCP port of the plain HTTP service
    #[arg(long, env = "HTTP_PORT", default_value_t = 5000)]
    pub http_port: u16,

    /// Principal on the secured transport
    #[arg(long, env = "SNMP_USER", default_value = "dmeuser")]
    pub user: String,

    /// Authentication secret
    #[arg(long, env = "SNMP_AUTH_PASSWORD", default_value = "authpassword", hide_env_values = true)]
    pub auth_password: String,

    /// Privacy secret
    #[arg(long, env = "SNMP_PRIV_PASSWORD", default_value = "privpassword", hide_env_values = true)]
    pub priv_password: String,

    /// Seconds to wait after each collection
    #[arg(long, env = "COLLECTION_INTERVAL", default_value_t = 180)]
    pub interval: u64,

    /// Durable log file
    #[arg(long, env = "OUTPUT_FILE", default_value = "dme_data.csv")]
    pub output: PathBuf,

    /// Forward each record to the streaming sink
    #[arg(
        long,
        env = "LOGSTASH_ENABLED",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub logstash_enabled: bool,

    /// Host of the streaming sink
    #[arg(long, env = "LOGSTASH_HOST", default_value = "logstash")]
    pub logstash_host: String,

    /// TCP port of the streaming sink
    #[arg(long, env = "LOGSTASH_PORT", default_value_t = 5044)]
    pub logstash_port: u16,

    /// Additional secured attempts after the first
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Seconds allowed for one transport attempt
    #[arg(long, env = "TIMEOUT", default_value_t = 10)]
    pub timeout: u64,

    /// Milliseconds before the first retry, doubled each time
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value_t = 500)]
    pub retry_backoff_ms: u64,

    /// Seconds allowed for one sink delivery
    #[arg(long, env = "LOGSTASH_TIMEOUT", default_value_t = 5)]
    pub forward_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Where records are forwarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

/// Validated collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Host of the agent
    pub agent_host: String,
    /// Secured transport port
    pub secure_port: u16,
    /// Plain transport port
    pub http_port: u16,
    /// The principal's credential
    pub credential: TransportCredential,
    /// Pause after each cycle
    pub interval: Duration,
    /// Durable log file
    pub output: PathBuf,
    /// Streaming sink, if enabled
    pub sink: Option<SinkConfig>,
    /// Additional secured attempts
    pub max_retries: u32,
    /// Per-attempt timeout of either transport
    pub timeout: Duration,
    /// Delay before the first retry
    pub retry_backoff: Duration,
}

impl CollectorConfig {
    /// Validate command-line arguments
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        if args.snmp_host.trim().is_empty() {
            return Err(ConfigError::invalid("snmp-host", "must not be empty"));
        }
        if args.snmp_port == 0 {
            return Err(ConfigError::invalid("snmp-port", "must be non-zero"));
        }
        if args.http_port == 0 {
            return Err(ConfigError::invalid("http-port", "must be non-zero"));
        }
        if args.user.is_empty() || args.user.len() > MAX_PRINCIPAL_LEN {
            return Err(ConfigError::invalid(
                "user",
                format!("must be 1 to {} bytes", MAX_PRINCIPAL_LEN),
            ));
        }
        for (field, secret) in [
            ("auth-password", &args.auth_password),
            ("priv-password", &args.priv_password),
        ] {
            if secret.len() < MIN_SECRET_LEN {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be at least {} characters", MIN_SECRET_LEN),
                ));
            }
        }
        for (field, secs) in [
            ("interval", args.interval),
            ("timeout", args.timeout),
            ("forward-timeout", args.forward_timeout),
        ] {
            if secs == 0 {
                return Err(ConfigError::invalid(field, "must be non-zero"));
            }
        }
        if args.output.as_os_str().is_empty() {
            return Err(ConfigError::invalid("output", "must not be empty"));
        }

        let sink = if args.logstash_enabled {
            if args.logstash_port == 0 {
                return Err(ConfigError::invalid("logstash-port", "must be non-zero"));
            }
            Some(SinkConfig {
                host: args.logstash_host.clone(),
                port: args.logstash_port,
                timeout: Duration::from_secs(args.forward_timeout),
            })
        } else {
            None
        };

        Ok(Self {
            agent_host: args.snmp_host.trim().to_string(),
            secure_port: args.snmp_port,
            http_port: args.http_port,
            credential: TransportCredential::new(
                args.user.clone(),
                args.auth_password.clone(),
                args.priv_password.clone(),
            ),
            interval: Duration::from_secs(args.interval),
            output: args.output.clone(),
            sink,
            max_retries: args.max_retries,
            timeout: Duration::from_secs(args.timeout),
            retry_backoff: Duration::from_millis(args.retry_backoff_ms),
        })
    }
}
