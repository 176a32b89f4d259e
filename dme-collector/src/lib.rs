// DME Collector - Telemetry collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # DME Collector
//!
//! Periodically reads every metric of a DME agent and keeps a durable record.
//!
//! - Reads over the secured transport with retries, falling back to the plain
//!   transport once
//! - Appends a fixed-width row to a tab-delimited log
//! - Optionally forwards each persisted row to a streaming sink

pub mod collector;
pub mod config;
pub mod error;
pub mod forward;
pub mod log;
pub mod retry;
pub mod transport;

pub use collector::{Collector, CollectorStats, CollectorStatsSnapshot, CycleOutcome};
pub use config::{Args, CollectorConfig, SinkConfig};
pub use error::{CollectorError, ConfigError, ForwardError, PersistError, Result, TransportError};
pub use forward::{Forwarder, SinkMessage};
pub use log::DurableLog;
pub use retry::{with_retry, RetryResult, RetryStrategy, Retryable};
pub use transport::{PlainTransport, Reading, SecuredTransport, Transport, TransportKind};

use dme::MetricSet;
use std::sync::Arc;

/// Build a collector for the built-in DME metric set
pub fn build(config: &CollectorConfig) -> Result<Collector> {
    let schema = Arc::new(MetricSet::dme());

    let secured = SecuredTransport::new(
        config.agent_host.clone(),
        config.secure_port,
        config.credential.clone(),
        config.timeout,
    );
    let plain = PlainTransport::new(&config.agent_host, config.http_port, config.timeout)?;
    let log = DurableLog::new(config.output.clone(), &schema);
    let strategy = RetryStrategy::exponential(config.max_retries, config.retry_backoff);

    let mut collector = Collector::new(schema, Box::new(secured), Box::new(plain), strategy, log);
    if let Some(sink) = &config.sink {
        collector = collector.with_forwarder(Forwarder::new(
            sink.host.clone(),
            sink.port,
            sink.timeout,
            config.interval,
        ));
    }
    Ok(collector)
}
