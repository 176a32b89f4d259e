// DME Telemetry - Secured transport responder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Transport-free responder of the secured polling protocol
//!
//! [`SecureResponder::handle`] takes one datagram and returns the datagram to
//! send back, if any. Incoming messages are checked in a fixed order:
//!
//! 1. envelope decode (failure: dropped)
//! 2. engine id (empty: discovery report)
//! 3. security level
//! 4. principal
//! 5. time window
//! 6. MAC, then decryption
//! 7. PDU decode (failure: dropped)
//!
//! Rejections in steps 2-6 happen before any metric is read and are answered,
//! when the sender asked for it, with an unauthenticated report.

use crate::error::SecurityError;
use crate::pdu::{ErrorStatus, Pdu, PduKind, Value, VarBind};
use crate::schema::{Oid, DME_ENTERPRISE};
use crate::security::{
    report_oid, EngineParams, Envelope, SecurityContext, TransportCredential, MAX_ENGINE_ID_LEN,
};
use crate::store::{MetricStore, Snapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Upper bound on varbinds in one bulk response
pub const MAX_BULK_VARBINDS: usize = 64;

/// Length of a generated engine id
pub const ENGINE_ID_LEN: usize = 12;

/// Configuration of a [`SecureResponder`]
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// The single principal allowed to read
    pub credential: TransportCredential,
    /// Subtree the principal may read
    pub view: Oid,
    /// Engine identity
    pub engine_id: Vec<u8>,
    /// Engine boot counter
    pub boots: u32,
}

impl ResponderConfig {
    /// Configuration with a random engine id
    pub fn new(credential: TransportCredential, view: Oid) -> Self {
        Self {
            credential,
            view,
            engine_id: random_engine_id(),
            boots: 1,
        }
    }

    /// Use a fixed engine id of 1 to [`MAX_ENGINE_ID_LEN`] bytes
    pub fn with_engine_id(
        mut self,
        engine_id: impl Into<Vec<u8>>,
    ) -> Result<Self, SecurityError> {
        let engine_id = engine_id.into();
        if engine_id.is_empty() {
            return Err(SecurityError::EmptyEngineId);
        }
        if engine_id.len() > MAX_ENGINE_ID_LEN {
            return Err(SecurityError::FieldTooLong {
                field: "engine id",
                max: MAX_ENGINE_ID_LEN,
            });
        }
        self.engine_id = engine_id;
        Ok(self)
    }
}

/// 12 random bytes
pub fn random_engine_id() -> Vec<u8> {
    rand::random::<[u8; ENGINE_ID_LEN]>().to_vec()
}

/// Counters of a responder
#[derive(Debug, Default)]
pub struct ResponderStats {
    served: AtomicU64,
    dropped: AtomicU64,
    authorization_errors: AtomicU64,
    unsupported_sec_levels: AtomicU64,
    not_in_time_windows: AtomicU64,
    unknown_user_names: AtomicU64,
    unknown_engine_ids: AtomicU64,
    wrong_digests: AtomicU64,
    decryption_errors: AtomicU64,
}

/// Point-in-time copy of [`ResponderStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests answered with a response PDU
    pub served: u64,
    /// Datagrams dropped without an answer
    pub dropped: u64,
    /// Requests that touched an OID outside the view
    pub authorization_errors: u64,
    pub unsupported_sec_levels: u64,
    pub not_in_time_windows: u64,
    pub unknown_user_names: u64,
    pub unknown_engine_ids: u64,
    pub wrong_digests: u64,
    pub decryption_errors: u64,
}

impl StatsSnapshot {
    /// Sum of all security rejections
    pub fn security_rejections(&self) -> u64 {
        self.unsupported_sec_levels
            + self.not_in_time_windows
            + self.unknown_user_names
            + self.unknown_engine_ids
            + self.wrong_digests
            + self.decryption_errors
    }
}

impl ResponderStats {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a rejection, returning the counter's new value
    fn record(&self, error: SecurityError) -> u64 {
        let counter = match error {
            SecurityError::UnsupportedSecLevel => &self.unsupported_sec_levels,
            SecurityError::NotInTimeWindow => &self.not_in_time_windows,
            SecurityError::UnknownUserName => &self.unknown_user_names,
            SecurityError::UnknownEngineId => &self.unknown_engine_ids,
            SecurityError::WrongDigest => &self.wrong_digests,
            SecurityError::DecryptionError => &self.decryption_errors,
            SecurityError::EncryptionError
            | SecurityError::FieldTooLong { .. }
            | SecurityError::EmptyEngineId => &self.dropped,
        };
        Self::bump(counter)
    }

    /// Copy the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            served: get(&self.served),
            dropped: get(&self.dropped),
            authorization_errors: get(&self.authorization_errors),
            unsupported_sec_levels: get(&self.unsupported_sec_levels),
            not_in_time_windows: get(&self.not_in_time_windows),
            unknown_user_names: get(&self.unknown_user_names),
            unknown_engine_ids: get(&self.unknown_engine_ids),
            wrong_digests: get(&self.wrong_digests),
            decryption_errors: get(&self.decryption_errors),
        }
    }
}

/// Answers secured-transport requests from a [`MetricStore`]
#[derive(Debug)]
pub struct SecureResponder {
    store: Arc<MetricStore>,
    security: SecurityContext,
    view: Oid,
    engine_id: Vec<u8>,
    boots: u32,
    started: Instant,
    stats: ResponderStats,
}

impl SecureResponder {
    /// Create a responder; its engine clock starts now
    pub fn new(store: Arc<MetricStore>, config: ResponderConfig) -> Self {
        let security = SecurityContext::new(config.credential, &config.engine_id);
        Self {
            store,
            security,
            view: config.view,
            engine_id: config.engine_id,
            boots: config.boots,
            started: Instant::now(),
            stats: ResponderStats::default(),
        }
    }

    /// Responder over the DME enterprise subtree with a random engine id
    pub fn dme(store: Arc<MetricStore>, credential: TransportCredential) -> Self {
        Self::new(store, ResponderConfig::new(credential, Oid::new(DME_ENTERPRISE)))
    }

    /// Engine id
    pub fn engine_id(&self) -> &[u8] {
        &self.engine_id
    }

    /// Readable subtree
    pub fn view(&self) -> &Oid {
        &self.view
    }

    /// Counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Seconds since the responder started
    pub fn engine_time(&self) -> u32 {
        u32::try_from(self.started.elapsed().as_secs()).unwrap_or(u32::MAX)
    }

    /// Engine parameters at a given engine time
    pub fn engine_params(&self, time: u32) -> EngineParams {
        EngineParams::new(self.engine_id.clone(), self.boots, time)
    }

    /// Handle one datagram
    pub fn handle(&self, datagram: &[u8]) -> Option<Vec<u8>> {
        self.handle_at(datagram, self.engine_time())
    }

    /// Handle one datagram as if the engine clock read `engine_time`
    pub fn handle_at(&self, datagram: &[u8], engine_time: u32) -> Option<Vec<u8>> {
        let envelope = match Envelope::from_bytes(datagram) {
            Ok(envelope) => envelope,
            Err(e) => {
                ResponderStats::bump(&self.stats.dropped);
                debug!(error = %e, "dropping undecodable datagram");
                return None;
            }
        };
        let engine = self.engine_params(engine_time);

        let plaintext = match self.authenticate(&envelope, &engine) {
            Ok(plaintext) => plaintext,
            Err(error) => return self.reject(&envelope, engine, error),
        };

        let request = match Pdu::from_bytes(&plaintext) {
            Ok(pdu) if pdu.kind.is_request() => pdu,
            Ok(pdu) => {
                ResponderStats::bump(&self.stats.dropped);
                debug!(kind = ?pdu.kind, "dropping non-request PDU");
                return None;
            }
            Err(e) => {
                ResponderStats::bump(&self.stats.dropped);
                debug!(error = %e, "dropping undecodable PDU");
                return None;
            }
        };

        let response = self.respond(&request);
        match self.security.seal(envelope.msg_id, engine, false, &response) {
            Ok(sealed) => {
                ResponderStats::bump(&self.stats.served);
                Some(sealed.to_bytes())
            }
            Err(e) => {
                ResponderStats::bump(&self.stats.dropped);
                debug!(error = %e, "failed to seal response");
                None
            }
        }
    }

    /// Security checks, returning the encoded PDU
    fn authenticate(
        &self,
        envelope: &Envelope,
        engine: &EngineParams,
    ) -> Result<Vec<u8>, SecurityError> {
        if envelope.engine.engine_id != self.engine_id {
            return Err(SecurityError::UnknownEngineId);
        }
        if envelope.flags.level() < self.security.level() {
            return Err(SecurityError::UnsupportedSecLevel);
        }
        if envelope.principal != self.security.principal() {
            return Err(SecurityError::UnknownUserName);
        }
        if !engine.in_time_window(envelope.engine.boots, envelope.engine.time) {
            return Err(SecurityError::NotInTimeWindow);
        }
        self.security.unseal(envelope)
    }

    fn reject(
        &self,
        envelope: &Envelope,
        engine: EngineParams,
        error: SecurityError,
    ) -> Option<Vec<u8>> {
        let count = self.stats.record(error);
        debug!(error = %error, principal = %envelope.principal, "rejecting message");
        if !envelope.flags.reportable {
            return None;
        }
        let counter = report_oid(error)?;
        let request_id = if envelope.flags.privacy {
            0
        } else {
            Pdu::from_bytes(&envelope.body).map_or(0, |pdu| pdu.request_id)
        };
        let report = Pdu::report(request_id, counter, i64::try_from(count).unwrap_or(i64::MAX));
        Some(Envelope::plain(envelope.msg_id, false, engine, &report).to_bytes())
    }

    /// Answer an authenticated request from one snapshot of the store
    pub fn respond(&self, request: &Pdu) -> Pdu {
        if let Some(index) = request
            .varbinds
            .iter()
            .position(|vb| !vb.oid.starts_with(&self.view))
        {
            ResponderStats::bump(&self.stats.authorization_errors);
            debug!(oid = %request.varbinds[index].oid, "OID outside view");
            let error_index = u16::try_from(index + 1).unwrap_or(u16::MAX);
            return Pdu::error_response(request, ErrorStatus::AuthorizationError, error_index);
        }

        let snapshot = self.store.snapshot();
        let varbinds = match request.kind {
            PduKind::Get => request
                .varbinds
                .iter()
                .map(|vb| {
                    let value = snapshot
                        .value_by_oid(&vb.oid)
                        .map_or(Value::NoSuchObject, Value::Integer);
                    VarBind::new(vb.oid.clone(), value)
                })
                .collect(),
            PduKind::GetNext => request
                .varbinds
                .iter()
                .map(|vb| self.next_in_view(&snapshot, &vb.oid))
                .collect(),
            PduKind::GetBulk {
                non_repeaters,
                max_repetitions,
            } => self.bulk(&snapshot, request, non_repeaters, max_repetitions),
            PduKind::Response { .. } | PduKind::Report => {
                return Pdu::error_response(request, ErrorStatus::GenErr, 0);
            }
        };
        Pdu::response(request.request_id, varbinds)
    }

    fn next_in_view(&self, snapshot: &Snapshot, oid: &Oid) -> VarBind {
        match snapshot.next_after(oid) {
            Some((metric, value)) if metric.oid.starts_with(&self.view) => {
                VarBind::new(metric.oid.clone(), Value::Integer(value))
            }
            _ => VarBind::new(oid.clone(), Value::EndOfMibView),
        }
    }

    fn bulk(
        &self,
        snapshot: &Snapshot,
        request: &Pdu,
        non_repeaters: u16,
        max_repetitions: u16,
    ) -> Vec<VarBind> {
        let split = usize::from(non_repeaters).min(request.varbinds.len());
        let mut out: Vec<VarBind> = request.varbinds[..split]
            .iter()
            .take(MAX_BULK_VARBINDS)
            .map(|vb| self.next_in_view(snapshot, &vb.oid))
            .collect();

        let mut cursors: Vec<Oid> = request.varbinds[split..]
            .iter()
            .map(|vb| vb.oid.clone())
            .collect();

        'repeat: for _ in 0..max_repetitions {
            if cursors.is_empty() {
                break;
            }
            let mut exhausted = true;
            for cursor in cursors.iter_mut() {
                if out.len() >= MAX_BULK_VARBINDS {
                    break 'repeat;
                }
                let next = self.next_in_view(snapshot, cursor);
                if next.value != Value::EndOfMibView {
                    exhausted = false;
                    *cursor = next.oid.clone();
                }
                out.push(next);
            }
            if exhausted {
                break;
            }
        }
        out
    }
}
