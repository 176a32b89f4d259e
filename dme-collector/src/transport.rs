// DME Collector - Telemetry collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Transports reading the agent
//!
//! - [`SecuredTransport`]: authenticated and encrypted UDP polling
//! - [`PlainTransport`]: JSON over HTTP, used as fallback

use crate::error::TransportError;
use async_trait::async_trait;
use dme::{
    ClientSession, ErrorStatus, MetricSet, Oid, OutgoingRequest, Pdu, PduKind, SecurityError,
    SessionError, TransportCredential, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;
use tracing::debug;

/// Values keyed by metric name
pub type Reading = HashMap<String, i64>;

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 65_507;

/// Which transport produced a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Authenticated and encrypted UDP
    Secured,
    /// Unauthenticated HTTP
    Plain,
}

impl TransportKind {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Secured => "secured",
            TransportKind::Plain => "plain",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A way of reading every metric from the agent
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which transport this is
    fn kind(&self) -> TransportKind;

    /// Read the metrics of `schema`
    ///
    /// Metrics the agent could not provide are left out of the reading.
    async fn fetch(&self, schema: &MetricSet) -> Result<Reading, TransportError>;
}

/// Secured UDP transport
///
/// The engine is discovered on first use and kept across fetches; it is
/// forgotten when the agent reports an unknown engine or a clock mismatch.
#[derive(Debug)]
pub struct SecuredTransport {
    host: String,
    port: u16,
    timeout: Duration,
    session: Mutex<ClientSession>,
}

impl SecuredTransport {
    /// New transport for `host:port`
    ///
    /// `timeout` bounds one attempt, discovery included.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        credential: TransportCredential,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            session: Mutex::new(ClientSession::new(credential)),
        }
    }

    /// Whether the agent's engine is currently known
    pub async fn is_discovered(&self) -> bool {
        self.session.lock().await.is_discovered()
    }

    /// Read every metric below `root` with bulk requests
    pub async fn walk(
        &self,
        root: &Oid,
        max_repetitions: u16,
    ) -> Result<Vec<(Oid, i64)>, TransportError> {
        let mut session = self.session.lock().await;
        let session = &mut *session;
        let attempt = async {
            let socket = self.connect().await?;
            let mut found = Vec::new();
            let mut cursor = root.clone();
            'walk: loop {
                let response = self
                    .request(&socket, session, |s| {
                        s.get_bulk(0, max_repetitions, [cursor.clone()])
                    })
                    .await?;
                check_status(&response)?;
                if response.varbinds.is_empty() {
                    break;
                }
                for vb in response.varbinds {
                    if vb.value == Value::EndOfMibView || !vb.oid.starts_with(root) {
                        break 'walk;
                    }
                    if let Some(value) = vb.value.as_integer() {
                        found.push((vb.oid.clone(), value));
                    }
                    cursor = vb.oid;
                }
            }
            Ok::<_, TransportError>(found)
        };
        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| self.timed_out())?
    }

    fn timed_out(&self) -> TransportError {
        TransportError::Timeout {
            transport: TransportKind::Secured,
            after: self.timeout,
        }
    }

    async fn connect(&self) -> Result<UdpSocket, TransportError> {
        let target: SocketAddr = lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| TransportError::Resolve(format!("{}:{}", self.host, self.port)))?;
        let local = if target.is_ipv4() {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        } else {
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        Ok(socket)
    }

    /// Discover if needed, then send one request and wait for its response
    async fn request(
        &self,
        socket: &UdpSocket,
        session: &mut ClientSession,
        build: impl Fn(&ClientSession) -> Pdu,
    ) -> Result<Pdu, TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        if !session.is_discovered() {
            let discovery = session.discovery_request();
            socket.send(&discovery.bytes).await?;
            loop {
                let len = socket.recv(&mut buf).await?;
                match session.complete_discovery(&discovery, &buf[..len]) {
                    Ok(()) => break,
                    Err(e) => debug!(error = %e, "ignoring datagram during discovery"),
                }
            }
            debug!(host = %self.host, port = self.port, "engine discovered");
        }

        let pdu = build(session);
        let request: OutgoingRequest = session.seal(pdu)?;
        socket.send(&request.bytes).await?;
        loop {
            let len = socket.recv(&mut buf).await?;
            match session.open_response(&request, &buf[..len]) {
                Ok(pdu) => return Ok(pdu),
                Err(SessionError::Unexpected(reason)) => {
                    debug!(%reason, "ignoring unrelated datagram");
                }
                Err(SessionError::Report(
                    error @ (SecurityError::UnknownEngineId | SecurityError::NotInTimeWindow),
                )) => {
                    session.forget_engine();
                    return Err(TransportError::Rejected(error));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl Transport for SecuredTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Secured
    }

    async fn fetch(&self, schema: &MetricSet) -> Result<Reading, TransportError> {
        let mut session = self.session.lock().await;
        let session = &mut *session;
        let attempt = async {
            let socket = self.connect().await?;
            let response = self
                .request(&socket, session, |s| s.get(schema.oids()))
                .await?;
            check_status(&response)?;
            Ok::<_, TransportError>(reading_from_response(schema, &response))
        };
        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| self.timed_out())?
    }
}

fn check_status(response: &Pdu) -> Result<(), TransportError> {
    match response.kind {
        PduKind::Response {
            error_status: ErrorStatus::NoError,
            ..
        } => Ok(()),
        PduKind::Response {
            error_status,
            error_index,
        } => Err(TransportError::ErrorStatus {
            status: error_status,
            index: error_index,
        }),
        other => Err(TransportError::Malformed(format!("unexpected {:?}", other))),
    }
}

/// Integer bindings of known OIDs; exceptions are left out
fn reading_from_response(schema: &MetricSet, response: &Pdu) -> Reading {
    response
        .varbinds
        .iter()
        .filter_map(|vb| {
            let metric = schema.by_oid(&vb.oid)?;
            let value = vb.value.as_integer()?;
            Some((metric.name.clone(), value))
        })
        .collect()
}

/// Body of the plain `/all` endpoint
#[derive(Debug, Deserialize)]
struct AllResponse {
    data: HashMap<String, serde_json::Value>,
}

/// Plain HTTP transport
#[derive(Debug, Clone)]
pub struct PlainTransport {
    client: reqwest::Client,
    url: String,
}

impl PlainTransport {
    /// New transport reading `http://host:port/all`
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("http://{}:{}/all", host, port),
        })
    }

    /// URL polled
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for PlainTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Plain
    }

    async fn fetch(&self, schema: &MetricSet) -> Result<Reading, TransportError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let body: AllResponse = response.json().await?;
        Ok(body
            .data
            .into_iter()
            .filter(|(name, _)| schema.by_name(name).is_some())
            .filter_map(|(name, value)| value.as_i64().map(|v| (name, v)))
            .collect())
    }
}
