// DME Collector - Telemetry collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Streaming sink forwarding
//!
//! One newline-terminated JSON message per TCP connection. Delivery is
//! attempted once; failures never reach the durable log.

use crate::error::ForwardError;
use crate::transport::TransportKind;
use dme::CollectionRecord;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Value of the `type` field
pub const MESSAGE_TYPE: &str = "dme_metrics";

/// Message sent to the sink
#[derive(Debug, Serialize)]
pub struct SinkMessage {
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub metrics: Map<String, Value>,
    pub collection_method: TransportKind,
    pub degraded: bool,
    pub collector: CollectorInfo,
}

/// Identity of the sending collector
#[derive(Debug, Serialize)]
pub struct CollectorInfo {
    pub version: &'static str,
    pub interval: u64,
}

impl SinkMessage {
    /// Message for a persisted record
    pub fn new(record: &CollectionRecord, method: TransportKind, interval: Duration) -> Self {
        Self {
            timestamp: record.iso_timestamp(),
            kind: MESSAGE_TYPE,
            metrics: record
                .values
                .iter()
                .map(|(name, value)| (name.clone(), Value::from(*value)))
                .collect(),
            collection_method: method,
            degraded: record.is_degraded(),
            collector: CollectorInfo {
                version: env!("CARGO_PKG_VERSION"),
                interval: interval.as_secs(),
            },
        }
    }
}

/// Sends records to the streaming sink
#[derive(Debug, Clone)]
pub struct Forwarder {
    host: String,
    port: u16,
    timeout: Duration,
    interval: Duration,
}

impl Forwarder {
    /// Forwarder to `host:port`
    ///
    /// `timeout` bounds connect plus write; `interval` is reported in each
    /// message.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration, interval: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            interval,
        }
    }

    /// Sink address as `host:port`
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Deliver one record
    pub async fn forward(
        &self,
        record: &CollectionRecord,
        method: TransportKind,
    ) -> Result<(), ForwardError> {
        let mut line = serde_json::to_vec(&SinkMessage::new(record, method, self.interval))?;
        line.push(b'\n');

        let send = async {
            let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.write_all(&line).await?;
            stream.shutdown().await?;
            Ok::<_, ForwardError>(())
        };
        tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ForwardError::Timeout(self.timeout))?
    }
}
