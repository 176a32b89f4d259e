// DME Agent - Telemetry simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration of the DME agent
//!
//! Every flag falls back to an environment variable, then to a default.

use crate::error::ConfigError;
use clap::Parser;
use dme::security::{MAX_ENGINE_ID_LEN, MAX_PRINCIPAL_LEN, MIN_SECRET_LEN};
use dme::{Oid, TransportCredential};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// DME telemetry simulator
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// UDP port of the secured transport
    #[arg(long, env = "SNMP_PORT", default_value_t = 161)]
    pub snmp_port: u16,

    /// Address both servers listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// TCP port of the plain HTTP service
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub http_port: u16,

    /// Principal allowed on the secured transport
    #[arg(long, env = "SNMP_USER", default_value = "dmeuser")]
    pub user: String,

    /// Authentication secret
    #[arg(long, env = "SNMP_AUTH_PASSWORD", default_value = "authpassword", hide_env_values = true)]
    pub auth_password: String,

    /// Privacy secret
    #[arg(long, env = "SNMP_PRIV_PASSWORD", default_value = "privpassword", hide_env_values = true)]
    pub priv_password: String,

    /// OID subtree the principal may read
    #[arg(long, env = "SNMP_VIEW", default_value = "1.3.6.1.4.1")]
    pub view: String,

    /// Engine id as hex (random when absent)
    #[arg(long, env = "SNMP_ENGINE_ID")]
    pub engine_id: Option<String>,

    /// Seconds between updates of the volatile metrics
    #[arg(long, env = "UPDATE_INTERVAL", default_value_t = 180)]
    pub update_interval: u64,

    /// Requests per minute per caller on /oid/{oid}
    #[arg(long, env = "OID_RATE_PER_MIN", default_value_t = 30)]
    pub oid_rate: u32,

    /// Requests per minute per caller on /all
    #[arg(long, env = "ALL_RATE_PER_MIN", default_value_t = 10)]
    pub all_rate: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Validated agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Bind address of the secured transport
    pub secure_addr: SocketAddr,
    /// Bind address of the plain HTTP service
    pub http_addr: SocketAddr,
    /// The principal's credential
    pub credential: TransportCredential,
    /// Readable subtree
    pub view: Oid,
    /// Fixed engine id, or random
    pub engine_id: Option<Vec<u8>>,
    /// Period of the random walk
    pub update_interval: Duration,
    /// Ceiling of /oid/{oid} per caller and minute
    pub oid_rate_per_min: u32,
    /// Ceiling of /all per caller and minute
    pub all_rate_per_min: u32,
}

impl AgentConfig {
    /// Validate command-line arguments
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let host: IpAddr = args
            .host
            .parse()
            .map_err(|_| ConfigError::invalid("host", format!("{:?} is not an IP address", args.host)))?;

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

        let view: Oid = args
            .view
            .parse()
            .map_err(|e| ConfigError::invalid("view", format!("{}", e)))?;

        let engine_id = match &args.engine_id {
            Some(text) => {
                let bytes = hex::decode(text.trim())
                    .map_err(|e| ConfigError::invalid("engine-id", e.to_string()))?;
                if bytes.is_empty() || bytes.len() > MAX_ENGINE_ID_LEN {
                    return Err(ConfigError::invalid(
                        "engine-id",
                        format!("must be 1 to {} bytes", MAX_ENGINE_ID_LEN),
                    ));
                }
                Some(bytes)
            }
            None => None,
        };

        if args.update_interval == 0 {
            return Err(ConfigError::invalid("update-interval", "must be non-zero"));
        }
        if args.oid_rate == 0 {
            return Err(ConfigError::invalid("oid-rate", "must be non-zero"));
        }
        if args.all_rate == 0 {
            return Err(ConfigError::invalid("all-rate", "must be non-zero"));
        }

        Ok(Self {
            secure_addr: SocketAddr::new(host, args.snmp_port),
            http_addr: SocketAddr::new(host, args.http_port),
            credential: TransportCredential::new(
                args.user.clone(),
                args.auth_password.clone(),
                args.priv_password.clone(),
            ),
            view,
            engine_id,
            update_interval: Duration::from_secs(args.update_interval),
            oid_rate_per_min: args.oid_rate,
            all_rate_per_min: args.all_rate,
        })
    }

    /// Loopback configuration on ephemeral ports
    pub fn local(credential: TransportCredential) -> Self {
        let loopback = IpAddr::from([127, 0, 0, 1]);
        Self {
            secure_addr: SocketAddr::new(loopback, 0),
            http_addr: SocketAddr::new(loopback, 0),
            credential,
            view: Oid::new(dme::DME_ENTERPRISE),
            engine_id: None,
            update_interval: Duration::from_secs(180),
            oid_rate_per_min: 30,
            all_rate_per_min: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Explicit flags for every env-backed setting, with `overrides` replacing them
    fn parse(overrides: &[(&str, &str)]) -> Args {
        let base = [
            ("--host", "127.0.0.1"),
            ("--snmp-port", "1161"),
            ("--http-port", "5001"),
            ("--user", "dmeuser"),
            ("--auth-password", "authpassword"),
            ("--priv-password", "privpassword"),
            ("--view", "1.3.6.1.4.1"),
            ("--update-interval", "30"),
            ("--oid-rate", "30"),
            ("--all-rate", "10"),
        ];
        let mut argv = vec!["dme-agent"];
        for (flag, value) in base {
            argv.push(flag);
            argv.push(
                overrides
                    .iter()
                    .find(|(f, _)| *f == flag)
                    .map_or(value, |(_, v)| *v),
            );
        }
        for &(flag, value) in overrides {
            if !base.iter().any(|(f, _)| *f == flag) {
                argv.push(flag);
                argv.push(value);
            }
        }
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_valid_arguments() {
        let config = AgentConfig::from_args(&parse(&[("--engine-id", "80001f8880aabbcc")])).unwrap();
        assert_eq!(config.secure_addr, "127.0.0.1:1161".parse().unwrap());
        assert_eq!(config.http_addr, "127.0.0.1:5001".parse().unwrap());
        assert_eq!(config.view.to_string(), "1.3.6.1.4.1");
        assert_eq!(config.update_interval, Duration::from_secs(30));
        assert_eq!(
            config.engine_id,
            Some(vec![0x80, 0x00, 0x1f, 0x88, 0x80, 0xaa, 0xbb, 0xcc])
        );
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = AgentConfig::from_args(&parse(&[("--auth-password", "short")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "auth-password",
                ..
            }
        ));
    }

    #[test]
    fn test_user_length_limit() {
        let longest = "u".repeat(MAX_PRINCIPAL_LEN);
        let config = AgentConfig::from_args(&parse(&[("--user", longest.as_str())])).unwrap();
        assert_eq!(config.credential.principal, longest);

        let too_long = "u".repeat(MAX_PRINCIPAL_LEN + 1);
        let err = AgentConfig::from_args(&parse(&[("--user", too_long.as_str())])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "user", .. }));
    }

    #[test]
    fn test_engine_id_length_limit() {
        let longest = "ab".repeat(MAX_ENGINE_ID_LEN);
        let config = AgentConfig::from_args(&parse(&[("--engine-id", longest.as_str())])).unwrap();
        assert_eq!(config.engine_id.map(|id| id.len()), Some(MAX_ENGINE_ID_LEN));

        let too_long = "ab".repeat(MAX_ENGINE_ID_LEN + 1);
        let err = AgentConfig::from_args(&parse(&[("--engine-id", too_long.as_str())])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "engine-id", .. }));
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(AgentConfig::from_args(&parse(&[("--host", "dme_simulator")])).is_err());
        assert!(AgentConfig::from_args(&parse(&[("--view", "1.3.x")])).is_err());
        assert!(AgentConfig::from_args(&parse(&[("--engine-id", "zz")])).is_err());
        assert!(AgentConfig::from_args(&parse(&[("--update-interval", "0")])).is_err());
        assert!(AgentConfig::from_args(&parse(&[("--all-rate", "0")])).is_err());
    }
}
