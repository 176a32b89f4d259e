// DME Telemetry - Protocol data units
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Protocol data units of the secured polling transport
//!
//! This module defines the request/response units carried inside a secured
//! message, and their binary form:
//!
//! ```text
//! tag (1) | request_id (4) | field_a (2) | field_b (2) | count (2) | varbinds...
//! varbind = oid_len (1) | oid components (4 each) | value_tag (1) | value
//! ```
//!
//! `field_a`/`field_b` carry `error_status`/`error_index` in responses and
//! `non_repeaters`/`max_repetitions` in bulk requests. All integers are
//! big-endian. Tags follow the SNMP numbering.

use crate::error::DecodeError;
use crate::schema::Oid;

/// Maximum OID length accepted on the wire
pub const MAX_OID_LEN: usize = 128;

/// Maximum varbinds in one PDU
pub const MAX_VARBINDS: usize = 1024;

/// Fixed part of an encoded PDU
pub const PDU_HEADER_SIZE: usize = 11;

/// Value bound to an OID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// Placeholder in requests
    Null,
    /// Integer reading
    Integer(i64),
    /// No object at this OID
    NoSuchObject,
    /// Object exists but the instance does not
    NoSuchInstance,
    /// Iteration ran past the last object in view
    EndOfMibView,
}

impl Value {
    const TAG_INTEGER: u8 = 0x02;
    const TAG_NULL: u8 = 0x05;
    const TAG_NO_SUCH_OBJECT: u8 = 0x80;
    const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
    const TAG_END_OF_MIB_VIEW: u8 = 0x82;

    /// Integer payload, if any
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Check if this is one of the exception values
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }
}

/// OID/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    /// Object identifier
    pub oid: Oid,
    /// Bound value
    pub value: Value,
}

impl VarBind {
    /// Varbind with a `Null` value, as used in requests
    pub fn null(oid: Oid) -> Self {
        Self {
            oid,
            value: Value::Null,
        }
    }

    /// Varbind with a value
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }
}

/// Error status of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ErrorStatus {
    /// Success
    #[default]
    NoError = 0,
    /// Response would not fit
    TooBig = 1,
    /// Unspecified failure
    GenErr = 5,
    /// Request touched an OID outside the principal's view
    AuthorizationError = 16,
}

impl ErrorStatus {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ErrorStatus::NoError),
            1 => Some(ErrorStatus::TooBig),
            5 => Some(ErrorStatus::GenErr),
            16 => Some(ErrorStatus::AuthorizationError),
            _ => None,
        }
    }
}

/// Kind of PDU, with its kind-specific fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    /// Read exact OIDs
    Get,
    /// Read the successor of each OID
    GetNext,
    /// Successors for the first `non_repeaters`, then up to
    /// `max_repetitions` successors for the rest
    GetBulk {
        non_repeaters: u16,
        max_repetitions: u16,
    },
    /// Answer to a request
    Response {
        error_status: ErrorStatus,
        error_index: u16,
    },
    /// Security-layer report
    Report,
}

impl PduKind {
    const TAG_GET: u8 = 0xA0;
    const TAG_GET_NEXT: u8 = 0xA1;
    const TAG_RESPONSE: u8 = 0xA2;
    const TAG_GET_BULK: u8 = 0xA5;
    const TAG_REPORT: u8 = 0xA8;

    fn tag(&self) -> u8 {
        match self {
            PduKind::Get => Self::TAG_GET,
            PduKind::GetNext => Self::TAG_GET_NEXT,
            PduKind::GetBulk { .. } => Self::TAG_GET_BULK,
            PduKind::Response { .. } => Self::TAG_RESPONSE,
            PduKind::Report => Self::TAG_REPORT,
        }
    }

    fn fields(&self) -> (u16, u16) {
        match *self {
            PduKind::GetBulk {
                non_repeaters,
                max_repetitions,
            } => (non_repeaters, max_repetitions),
            PduKind::Response {
                error_status,
                error_index,
            } => (error_status as u16, error_index),
            _ => (0, 0),
        }
    }

    /// Check if this kind is a read request
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            PduKind::Get | PduKind::GetNext | PduKind::GetBulk { .. }
        )
    }
}

/// A protocol data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    /// Correlates responses with requests
    pub request_id: u32,
    /// Kind and kind-specific fields
    pub kind: PduKind,
    /// Variable bindings
    pub varbinds: Vec<VarBind>,
}

impl Pdu {
    /// Get request for the given OIDs
    pub fn get(request_id: u32, oids: impl IntoIterator<Item = Oid>) -> Self {
        Self::request(request_id, PduKind::Get, oids)
    }

    /// GetNext request for the given OIDs
    pub fn get_next(request_id: u32, oids: impl IntoIterator<Item = Oid>) -> Self {
        Self::request(request_id, PduKind::GetNext, oids)
    }

    /// GetBulk request
    pub fn get_bulk(
        request_id: u32,
        non_repeaters: u16,
        max_repetitions: u16,
        oids: impl IntoIterator<Item = Oid>,
    ) -> Self {
        Self::request(
            request_id,
            PduKind::GetBulk {
                non_repeaters,
                max_repetitions,
            },
            oids,
        )
    }

    fn request(request_id: u32, kind: PduKind, oids: impl IntoIterator<Item = Oid>) -> Self {
        Self {
            request_id,
            kind,
            varbinds: oids.into_iter().map(VarBind::null).collect(),
        }
    }

    /// Successful response
    pub fn response(request_id: u32, varbinds: Vec<VarBind>) -> Self {
        Self {
            request_id,
            kind: PduKind::Response {
                error_status: ErrorStatus::NoError,
                error_index: 0,
            },
            varbinds,
        }
    }

    /// Error response echoing the request's varbinds
    pub fn error_response(request: &Pdu, status: ErrorStatus, index: u16) -> Self {
        Self {
            request_id: request.request_id,
            kind: PduKind::Response {
                error_status: status,
                error_index: index,
            },
            varbinds: request.varbinds.clone(),
        }
    }

    /// Report carrying one counter
    pub fn report(request_id: u32, counter: Oid, value: i64) -> Self {
        Self {
            request_id,
            kind: PduKind::Report,
            varbinds: vec![VarBind::new(counter, Value::Integer(value))],
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PDU_HEADER_SIZE + self.varbinds.len() * 64);
        let (field_a, field_b) = self.kind.fields();
        bytes.push(self.kind.tag());
        bytes.extend_from_slice(&self.request_id.to_be_bytes());
        bytes.extend_from_slice(&field_a.to_be_bytes());
        bytes.extend_from_slice(&field_b.to_be_bytes());
        bytes.extend_from_slice(&(self.varbinds.len() as u16).to_be_bytes());

        for varbind in &self.varbinds {
            let components = varbind.oid.components();
            bytes.push(components.len() as u8);
            for component in components {
                bytes.extend_from_slice(&component.to_be_bytes());
            }
            match varbind.value {
                Value::Null => bytes.push(Value::TAG_NULL),
                Value::Integer(v) => {
                    bytes.push(Value::TAG_INTEGER);
                    bytes.extend_from_slice(&v.to_be_bytes());
                }
                Value::NoSuchObject => bytes.push(Value::TAG_NO_SUCH_OBJECT),
                Value::NoSuchInstance => bytes.push(Value::TAG_NO_SUCH_INSTANCE),
                Value::EndOfMibView => bytes.push(Value::TAG_END_OF_MIB_VIEW),
            }
        }
        bytes
    }

    /// Deserialize from bytes; the whole buffer must be consumed
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);

        let tag = reader.u8()?;
        let request_id = reader.u32()?;
        let field_a = reader.u16()?;
        let field_b = reader.u16()?;
        let count = reader.u16()? as usize;

        let kind = match tag {
            PduKind::TAG_GET => PduKind::Get,
            PduKind::TAG_GET_NEXT => PduKind::GetNext,
            PduKind::TAG_GET_BULK => PduKind::GetBulk {
                non_repeaters: field_a,
                max_repetitions: field_b,
            },
            PduKind::TAG_RESPONSE => {
                let status = u8::try_from(field_a)
                    .ok()
                    .and_then(ErrorStatus::from_u8)
                    .ok_or(DecodeError::UnknownErrorStatus(field_a as u8))?;
                PduKind::Response {
                    error_status: status,
                    error_index: field_b,
                }
            }
            PduKind::TAG_REPORT => PduKind::Report,
            other => return Err(DecodeError::UnknownPduType(other)),
        };

        if count > MAX_VARBINDS {
            return Err(DecodeError::Malformed {
                offset: reader.offset,
                reason: format!("{} varbinds exceeds maximum {}", count, MAX_VARBINDS),
            });
        }

        let mut varbinds = Vec::with_capacity(count);
        for _ in 0..count {
            let oid_len = reader.u8()? as usize;
            if oid_len == 0 || oid_len > MAX_OID_LEN {
                return Err(DecodeError::Malformed {
                    offset: reader.offset,
                    reason: format!("OID length {}", oid_len),
                });
            }
            let mut components = Vec::with_capacity(oid_len);
            for _ in 0..oid_len {
                components.push(reader.u32()?);
            }
            let value = match reader.u8()? {
                Value::TAG_NULL => Value::Null,
                Value::TAG_INTEGER => Value::Integer(reader.i64()?),
                Value::TAG_NO_SUCH_OBJECT => Value::NoSuchObject,
                Value::TAG_NO_SUCH_INSTANCE => Value::NoSuchInstance,
                Value::TAG_END_OF_MIB_VIEW => Value::EndOfMibView,
                other => return Err(DecodeError::UnknownValueType(other)),
            };
            varbinds.push(VarBind::new(Oid::new(components), value));
        }

        if reader.remaining() > 0 {
            return Err(DecodeError::TrailingData(reader.remaining()));
        }

        Ok(Self {
            request_id,
            kind,
            varbinds,
        })
    }
}

/// Bounds-checked big-endian reader
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pub(crate) offset: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::BufferTooShort {
                needed: self.offset + n,
                available: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// Length-prefixed (u8) byte string
    pub(crate) fn short_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u8()? as usize;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    #[test]
    fn test_get_request_layout() {
        let pdu = Pdu::get(7, [oid("1.3.6")]);
        let bytes = pdu.to_bytes();
        assert_eq!(bytes[0], 0xA0);
        assert_eq!(&bytes[1..5], &7u32.to_be_bytes());
        assert_eq!(&bytes[9..11], &1u16.to_be_bytes());
        // oid len + 3 components + null tag
        assert_eq!(bytes.len(), PDU_HEADER_SIZE + 1 + 12 + 1);
        assert_eq!(Pdu::from_bytes(&bytes).unwrap(), pdu);
    }

    #[test]
    fn test_response_with_exceptions() {
        let pdu = Pdu::response(
            99,
            vec![
                VarBind::new(oid("1.3.6.1.4.1.32275.2.1.2.2.5.36"), Value::Integer(-1080)),
                VarBind::new(oid("1.3.6.1.4.1.32275.9"), Value::NoSuchObject),
                VarBind::new(oid("1.3.6.1.4.1.32276"), Value::EndOfMibView),
            ],
        );
        let restored = Pdu::from_bytes(&pdu.to_bytes()).unwrap();
        assert_eq!(restored.varbinds[0].value.as_integer(), Some(-1080));
        assert!(restored.varbinds[1].value.is_exception());
        assert_eq!(restored.varbinds[2].value, Value::EndOfMibView);
    }

    #[test]
    fn test_bulk_and_error_fields() {
        let bulk = Pdu::get_bulk(1, 2, 10, [oid("1.3"), oid("1.4"), oid("1.5")]);
        let restored = Pdu::from_bytes(&bulk.to_bytes()).unwrap();
        assert_eq!(
            restored.kind,
            PduKind::GetBulk {
                non_repeaters: 2,
                max_repetitions: 10
            }
        );

        let error = Pdu::error_response(&bulk, ErrorStatus::AuthorizationError, 3);
        let restored = Pdu::from_bytes(&error.to_bytes()).unwrap();
        assert_eq!(
            restored.kind,
            PduKind::Response {
                error_status: ErrorStatus::AuthorizationError,
                error_index: 3
            }
        );
        assert_eq!(restored.varbinds.len(), 3);
    }

    #[test]
    fn test_truncated_input_rejected() {
        let bytes = Pdu::get(1, [oid("1.3.6.1")]).to_bytes();
        for cut in 0..bytes.len() {
            assert!(Pdu::from_bytes(&bytes[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_unknown_tags_rejected() {
        let mut bytes = Pdu::get(1, [oid("1.3")]).to_bytes();
        bytes[0] = 0xA3; // set request
        assert_eq!(Pdu::from_bytes(&bytes), Err(DecodeError::UnknownPduType(0xA3)));

        let mut bytes = Pdu::get(1, [oid("1.3")]).to_bytes();
        let last = bytes.len() - 1;
        bytes[last] = 0x44;
        assert_eq!(Pdu::from_bytes(&bytes), Err(DecodeError::UnknownValueType(0x44)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = Pdu::get(1, [oid("1.3")]).to_bytes();
        bytes.push(0);
        assert_eq!(Pdu::from_bytes(&bytes), Err(DecodeError::TrailingData(1)));
    }

    #[test]
    fn test_zero_length_oid_rejected() {
        let mut bytes = Pdu::get(1, [oid("1.3")]).to_bytes();
        bytes[PDU_HEADER_SIZE] = 0;
        assert!(matches!(
            Pdu::from_bytes(&bytes),
            Err(DecodeError::Malformed { .. })
        ));
    }
}
