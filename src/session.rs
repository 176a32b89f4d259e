// DME Telemetry - Client session
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Client side of the secured polling protocol
//!
//! A [`ClientSession`] discovers the agent's engine, localizes its keys to
//! it, and then seals requests and opens responses. It does no I/O.

use crate::error::{SecurityError, SessionError};
use crate::pdu::{Pdu, PduKind};
use crate::schema::Oid;
use crate::security::{report_error, EngineParams, Envelope, SecurityContext, TransportCredential};
use std::time::Instant;

/// A sealed request ready to send
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    /// Message id the answer must echo
    pub msg_id: u32,
    /// Request id the response PDU must echo
    pub request_id: u32,
    /// Datagram
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Discovered {
    engine: EngineParams,
    at: Instant,
    security: SecurityContext,
}

/// Client state for one agent
#[derive(Debug, Clone)]
pub struct ClientSession {
    credential: TransportCredential,
    discovered: Option<Discovered>,
    last_id: u32,
}

impl ClientSession {
    /// New, undiscovered session
    pub fn new(credential: TransportCredential) -> Self {
        Self {
            credential,
            discovered: None,
            last_id: rand::random::<u32>() >> 1,
        }
    }

    fn next_id(&mut self) -> u32 {
        self.last_id = self.last_id.wrapping_add(1);
        self.last_id
    }

    /// Whether the engine is known
    pub fn is_discovered(&self) -> bool {
        self.discovered.is_some()
    }

    /// Engine id learned through discovery
    pub fn engine_id(&self) -> Option<&[u8]> {
        self.discovered
            .as_ref()
            .map(|d| d.engine.engine_id.as_slice())
    }

    /// Drop the discovered engine, forcing a new discovery
    pub fn forget_engine(&mut self) {
        self.discovered = None;
    }

    /// Engine parameters with the clock advanced by local elapsed time
    pub fn estimated_engine(&self) -> Option<EngineParams> {
        self.discovered.as_ref().map(|d| {
            let elapsed = u32::try_from(d.at.elapsed().as_secs()).unwrap_or(u32::MAX);
            EngineParams {
                time: d.engine.time.saturating_add(elapsed),
                ..d.engine.clone()
            }
        })
    }

    /// Discovery request
    pub fn discovery_request(&mut self) -> OutgoingRequest {
        let msg_id = self.next_id();
        let request_id = self.next_id();
        let bytes = Envelope::discovery(msg_id, &Pdu::get(request_id, [])).to_bytes();
        OutgoingRequest {
            msg_id,
            request_id,
            bytes,
        }
    }

    /// Learn the engine from the report answering `discovery`
    pub fn complete_discovery(
        &mut self,
        discovery: &OutgoingRequest,
        answer: &[u8],
    ) -> Result<(), SessionError> {
        let envelope = Envelope::from_bytes(answer)?;
        if envelope.msg_id != discovery.msg_id {
            return Err(SessionError::Unexpected(format!(
                "message id {} does not match {}",
                envelope.msg_id, discovery.msg_id
            )));
        }
        let pdu = Pdu::from_bytes(&envelope.body)?;
        let reported = pdu
            .varbinds
            .first()
            .and_then(|vb| report_error(&vb.oid));
        if pdu.kind != PduKind::Report || reported != Some(SecurityError::UnknownEngineId) {
            return Err(SessionError::Unexpected(format!(
                "expected discovery report, got {:?}",
                pdu.kind
            )));
        }
        if envelope.engine.engine_id.is_empty() {
            return Err(SessionError::Unexpected(
                "discovery report without engine id".to_string(),
            ));
        }

        let security = SecurityContext::new(self.credential.clone(), &envelope.engine.engine_id);
        self.discovered = Some(Discovered {
            engine: envelope.engine,
            at: Instant::now(),
            security,
        });
        Ok(())
    }

    /// Get request for exact OIDs
    pub fn get(&self, oids: impl IntoIterator<Item = Oid>) -> Pdu {
        Pdu::get(0, oids)
    }

    /// GetNext request
    pub fn get_next(&self, oids: impl IntoIterator<Item = Oid>) -> Pdu {
        Pdu::get_next(0, oids)
    }

    /// GetBulk request
    pub fn get_bulk(
        &self,
        non_repeaters: u16,
        max_repetitions: u16,
        oids: impl IntoIterator<Item = Oid>,
    ) -> Pdu {
        Pdu::get_bulk(0, non_repeaters, max_repetitions, oids)
    }

    /// Assign fresh ids to a request and seal it for the discovered engine
    pub fn seal(&mut self, mut pdu: Pdu) -> Result<OutgoingRequest, SessionError> {
        let engine = self.estimated_engine().ok_or(SessionError::NotDiscovered)?;
        let msg_id = self.next_id();
        pdu.request_id = self.next_id();

        let security = match &self.discovered {
            Some(d) => &d.security,
            None => return Err(SessionError::NotDiscovered),
        };
        let envelope = security
            .seal(msg_id, engine, true, &pdu)
            .map_err(SessionError::Security)?;
        Ok(OutgoingRequest {
            msg_id,
            request_id: pdu.request_id,
            bytes: envelope.to_bytes(),
        })
    }

    /// Open the answer to a sealed request
    ///
    /// Reports are turned into [`SessionError::Report`]. Response PDUs are
    /// returned as-is, including error statuses.
    pub fn open_response(
        &self,
        request: &OutgoingRequest,
        answer: &[u8],
    ) -> Result<Pdu, SessionError> {
        let envelope = Envelope::from_bytes(answer)?;
        if envelope.msg_id != request.msg_id {
            return Err(SessionError::Unexpected(format!(
                "message id {} does not match {}",
                envelope.msg_id, request.msg_id
            )));
        }

        if !envelope.flags.auth {
            let pdu = Pdu::from_bytes(&envelope.body)?;
            return match pdu.varbinds.first().and_then(|vb| report_error(&vb.oid)) {
                Some(error) if pdu.kind == PduKind::Report => Err(SessionError::Report(error)),
                _ => Err(SessionError::Unexpected(
                    "unauthenticated answer".to_string(),
                )),
            };
        }

        let security = match &self.discovered {
            Some(d) => &d.security,
            None => return Err(SessionError::NotDiscovered),
        };
        let plaintext = security
            .unseal(&envelope)
            .map_err(SessionError::Security)?;
        let pdu = Pdu::from_bytes(&plaintext)?;

        if !matches!(pdu.kind, PduKind::Response { .. }) || pdu.request_id != request.request_id {
            return Err(SessionError::Unexpected(format!(
                "{:?} with request id {}",
                pdu.kind, pdu.request_id
            )));
        }
        Ok(pdu)
    }
}
