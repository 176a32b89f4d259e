// DME Telemetry - Security model
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Security model of the DME transports
//!
//! Provides the pieces both ends of the secured transport share:
//! - Credentials and security levels
//! - Key localization to an engine id (HKDF-SHA256)
//! - The message envelope, with HMAC-SHA256 authentication and
//!   AES-128-GCM privacy
//! - Report counter OIDs for rejected messages
//! - Per-caller rate limiting using a token bucket, for the plain transport
//!
//! Envelope layout (big-endian):
//!
//! ```text
//! version (1) | flags (1) | msg_id (4) | engine_id_len (1) | engine_id
//! | boots (4) | time (4) | principal_len (1) | principal | nonce (12)
//! | body_len (4) | body | mac (16, only with auth)
//! ```
//!
//! The header is everything up to and including the nonce. It is the
//! associated data of the cipher, and the MAC covers header, length and body.

use crate::error::{DecodeError, SecurityError};
use crate::pdu::{Pdu, Reader};
use crate::schema::Oid;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Key, KeyInit, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::{Duration, Instant};

type HmacSha256 = Hmac<Sha256>;

/// Envelope format version
pub const ENVELOPE_VERSION: u8 = 3;

/// Nonce length of the privacy layer
pub const NONCE_LEN: usize = 12;

/// Truncated MAC length
pub const MAC_LEN: usize = 16;

/// Maximum engine id length
pub const MAX_ENGINE_ID_LEN: usize = 32;

/// Accepted drift between message time and engine time, in seconds
pub const TIME_WINDOW_SECS: u32 = 150;

/// Maximum principal length
pub const MAX_PRINCIPAL_LEN: usize = 32;

/// Minimum length of an authentication or privacy secret
pub const MIN_SECRET_LEN: usize = 8;

/// Root of the report counters (`usmStats`)
pub const USM_STATS: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1];

const AUTH_INFO: &[u8] = b"dme-usm-auth";
const PRIV_INFO: &[u8] = b"dme-usm-priv";

/// Security level of a message or a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecurityLevel {
    /// Neither authenticated nor encrypted
    NoAuthNoPriv,
    /// Authenticated only
    AuthNoPriv,
    /// Authenticated and encrypted
    AuthPriv,
}

/// Message flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgFlags {
    /// Message carries a MAC
    pub auth: bool,
    /// Body is encrypted
    pub privacy: bool,
    /// Sender expects a report on failure
    pub reportable: bool,
}

impl MsgFlags {
    const AUTH: u8 = 0x01;
    const PRIV: u8 = 0x02;
    const REPORTABLE: u8 = 0x04;

    /// Flags for a security level
    pub fn for_level(level: SecurityLevel, reportable: bool) -> Self {
        Self {
            auth: level >= SecurityLevel::AuthNoPriv,
            privacy: level == SecurityLevel::AuthPriv,
            reportable,
        }
    }

    /// Security level these flags express
    pub fn level(&self) -> SecurityLevel {
        match (self.auth, self.privacy) {
            (true, true) => SecurityLevel::AuthPriv,
            (true, false) => SecurityLevel::AuthNoPriv,
            _ => SecurityLevel::NoAuthNoPriv,
        }
    }

    /// Convert to the wire byte
    pub fn to_u8(self) -> u8 {
        let mut bits = 0;
        if self.auth {
            bits |= Self::AUTH;
        }
        if self.privacy {
            bits |= Self::PRIV;
        }
        if self.reportable {
            bits |= Self::REPORTABLE;
        }
        bits
    }

    /// Convert from the wire byte
    pub fn from_u8(bits: u8) -> Option<Self> {
        if bits & !(Self::AUTH | Self::PRIV | Self::REPORTABLE) != 0 {
            return None;
        }
        let flags = Self {
            auth: bits & Self::AUTH != 0,
            privacy: bits & Self::PRIV != 0,
            reportable: bits & Self::REPORTABLE != 0,
        };
        // privacy without authentication is not a valid combination
        if flags.privacy && !flags.auth {
            return None;
        }
        Some(flags)
    }
}

/// Credentials of a principal on the secured transport
#[derive(Clone, PartialEq, Eq)]
pub struct TransportCredential {
    /// Principal (user) name
    pub principal: String,
    auth_secret: String,
    priv_secret: String,
    /// Level the principal requires
    pub level: SecurityLevel,
}

impl TransportCredential {
    /// Credential requiring authentication and privacy
    pub fn new(
        principal: impl Into<String>,
        auth_secret: impl Into<String>,
        priv_secret: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            auth_secret: auth_secret.into(),
            priv_secret: priv_secret.into(),
            level: SecurityLevel::AuthPriv,
        }
    }

    /// Override the required level
    pub fn with_level(mut self, level: SecurityLevel) -> Self {
        self.level = level;
        self
    }

    /// Check the principal fits the envelope header
    pub fn validate(&self) -> Result<(), SecurityError> {
        check_len("principal", self.principal.len(), MAX_PRINCIPAL_LEN)
    }

    /// Whether both secrets meet the minimum length
    pub fn secrets_valid(&self) -> bool {
        self.auth_secret.len() >= MIN_SECRET_LEN && self.priv_secret.len() >= MIN_SECRET_LEN
    }

    /// Keys localized to an engine
    pub fn localize(&self, engine_id: &[u8]) -> LocalizedKeys {
        LocalizedKeys::derive(
            engine_id,
            self.auth_secret.as_bytes(),
            self.priv_secret.as_bytes(),
        )
    }
}

impl fmt::Debug for TransportCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCredential")
            .field("principal", &self.principal)
            .field("auth_secret", &"<redacted>")
            .field("priv_secret", &"<redacted>")
            .field("level", &self.level)
            .finish()
    }
}

/// Authentication and privacy keys bound to one engine id
#[derive(Clone, PartialEq, Eq)]
pub struct LocalizedKeys {
    auth: [u8; 32],
    privacy: [u8; 16],
}

impl LocalizedKeys {
    /// Derive both keys, salting with the engine id
    pub fn derive(engine_id: &[u8], auth_secret: &[u8], priv_secret: &[u8]) -> Self {
        let mut auth = [0u8; 32];
        let mut privacy = [0u8; 16];
        expand(engine_id, auth_secret, AUTH_INFO, &mut auth);
        expand(engine_id, priv_secret, PRIV_INFO, &mut privacy);
        Self { auth, privacy }
    }

    fn hmac(&self) -> HmacSha256 {
        match <HmacSha256 as Mac>::new_from_slice(&self.auth) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC accepts keys of any length"),
        }
    }

    /// Truncated HMAC-SHA256 of `data`
    pub fn sign(&self, data: &[u8]) -> [u8; MAC_LEN] {
        let mut mac = self.hmac();
        mac.update(data);
        let digest = mac.finalize().into_bytes();
        let mut out = [0u8; MAC_LEN];
        out.copy_from_slice(&digest[..MAC_LEN]);
        out
    }

    /// Constant-time check of a truncated MAC
    pub fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        let mut mac = self.hmac();
        mac.update(data);
        mac.verify_truncated_left(tag).is_ok()
    }

    /// AES-128-GCM encryption
    pub fn encrypt(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SecurityError> {
        Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&self.privacy))
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| SecurityError::EncryptionError)
    }

    /// AES-128-GCM decryption
    pub fn decrypt(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SecurityError> {
        Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&self.privacy))
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| SecurityError::DecryptionError)
    }
}

impl fmt::Debug for LocalizedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LocalizedKeys(<redacted>)")
    }
}

fn expand(salt: &[u8], secret: &[u8], info: &[u8], out: &mut [u8]) {
    let hk = Hkdf::<Sha256>::new(Some(salt), secret);
    if hk.expand(info, out).is_err() {
        // Outputs here are at most one hash block long.
        unreachable!("HKDF output length {} too large", out.len());
    }
}

/// Identity and clock of the authoritative engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineParams {
    /// Engine id, salt of key localization
    pub engine_id: Vec<u8>,
    /// Number of times the engine (re)started
    pub boots: u32,
    /// Seconds since the last boot
    pub time: u32,
}

impl EngineParams {
    /// Parameters of an engine
    pub fn new(engine_id: impl Into<Vec<u8>>, boots: u32, time: u32) -> Self {
        Self {
            engine_id: engine_id.into(),
            boots,
            time,
        }
    }

    /// Check if a message claiming `boots`/`time` lies in the time window
    pub fn in_time_window(&self, boots: u32, time: u32) -> bool {
        boots == self.boots && self.time.abs_diff(time) <= TIME_WINDOW_SECS
    }
}

/// A secured-transport message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Security flags
    pub flags: MsgFlags,
    /// Message id, echoed in the answer
    pub msg_id: u32,
    /// Authoritative engine as seen by the sender
    pub engine: EngineParams,
    /// Principal name, empty for discovery and reports
    pub principal: String,
    /// Privacy nonce
    pub nonce: [u8; NONCE_LEN],
    /// Encoded PDU, encrypted when `flags.privacy`
    pub body: Vec<u8>,
    /// Truncated MAC, present when `flags.auth`
    pub mac: Option<[u8; MAC_LEN]>,
}

impl Envelope {
    /// Unauthenticated message carrying a clear PDU
    pub fn plain(msg_id: u32, reportable: bool, engine: EngineParams, pdu: &Pdu) -> Self {
        Self {
            flags: MsgFlags {
                reportable,
                ..MsgFlags::default()
            },
            msg_id,
            engine,
            principal: String::new(),
            nonce: [0u8; NONCE_LEN],
            body: pdu.to_bytes(),
            mac: None,
        }
    }

    /// Discovery request: reportable, unauthenticated, empty engine id
    pub fn discovery(msg_id: u32, pdu: &Pdu) -> Self {
        Self::plain(msg_id, true, EngineParams::default(), pdu)
    }

    /// Check every length-prefixed field fits its prefix
    pub fn validate(&self) -> Result<(), SecurityError> {
        check_len("engine id", self.engine.engine_id.len(), MAX_ENGINE_ID_LEN)?;
        check_len("principal", self.principal.len(), MAX_PRINCIPAL_LEN)
    }

    /// Header bytes, the associated data of the cipher
    ///
    /// Lengths are only meaningful after [`Envelope::validate`].
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            32 + self.engine.engine_id.len() + self.principal.len() + NONCE_LEN,
        );
        bytes.push(ENVELOPE_VERSION);
        bytes.push(self.flags.to_u8());
        bytes.extend_from_slice(&self.msg_id.to_be_bytes());
        bytes.push(self.engine.engine_id.len() as u8);
        bytes.extend_from_slice(&self.engine.engine_id);
        bytes.extend_from_slice(&self.engine.boots.to_be_bytes());
        bytes.extend_from_slice(&self.engine.time.to_be_bytes());
        bytes.push(self.principal.len() as u8);
        bytes.extend_from_slice(self.principal.as_bytes());
        bytes.extend_from_slice(&self.nonce);
        bytes
    }

    /// Bytes covered by the MAC
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header_bytes();
        bytes.extend_from_slice(&(self.body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.signed_bytes();
        if self.flags.auth {
            bytes.extend_from_slice(&self.mac.unwrap_or([0u8; MAC_LEN]));
        }
        bytes
    }

    /// Deserialize from bytes; the whole buffer must be consumed
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);

        let version = reader.u8()?;
        if version != ENVELOPE_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let raw_flags = reader.u8()?;
        let flags = MsgFlags::from_u8(raw_flags).ok_or_else(|| DecodeError::Malformed {
            offset: 1,
            reason: format!("invalid flags 0x{:02x}", raw_flags),
        })?;
        let msg_id = reader.u32()?;

        let engine_id = reader.short_bytes()?.to_vec();
        if engine_id.len() > MAX_ENGINE_ID_LEN {
            return Err(DecodeError::Malformed {
                offset: reader.offset,
                reason: format!("engine id of {} bytes", engine_id.len()),
            });
        }
        let boots = reader.u32()?;
        let time = reader.u32()?;

        let principal_offset = reader.offset;
        let principal = String::from_utf8(reader.short_bytes()?.to_vec()).map_err(|_| {
            DecodeError::Malformed {
                offset: principal_offset,
                reason: "principal is not UTF-8".to_string(),
            }
        })?;
        if principal.len() > MAX_PRINCIPAL_LEN {
            return Err(DecodeError::Malformed {
                offset: principal_offset,
                reason: format!("principal of {} bytes", principal.len()),
            });
        }
        let nonce = reader.array::<NONCE_LEN>()?;

        let body_len = reader.u32()? as usize;
        let body = reader.take(body_len)?.to_vec();
        let mac = if flags.auth {
            Some(reader.array::<MAC_LEN>()?)
        } else {
            None
        };

        if reader.remaining() > 0 {
            return Err(DecodeError::TrailingData(reader.remaining()));
        }

        Ok(Self {
            flags,
            msg_id,
            engine: EngineParams {
                engine_id,
                boots,
                time,
            },
            principal,
            nonce,
            body,
            mac,
        })
    }
}

/// A principal's credential with keys localized to one engine
#[derive(Debug, Clone)]
pub struct SecurityContext {
    credential: TransportCredential,
    keys: LocalizedKeys,
}

impl SecurityContext {
    /// Localize a credential to an engine id
    pub fn new(credential: TransportCredential, engine_id: &[u8]) -> Self {
        let keys = credential.localize(engine_id);
        Self { credential, keys }
    }

    /// Principal name
    pub fn principal(&self) -> &str {
        &self.credential.principal
    }

    /// Level the principal requires
    pub fn level(&self) -> SecurityLevel {
        self.credential.level
    }

    /// Localized keys
    pub fn keys(&self) -> &LocalizedKeys {
        &self.keys
    }

    /// Wrap a PDU at the principal's level
    pub fn seal(
        &self,
        msg_id: u32,
        engine: EngineParams,
        reportable: bool,
        pdu: &Pdu,
    ) -> Result<Envelope, SecurityError> {
        let flags = MsgFlags::for_level(self.level(), reportable);
        let mut envelope = Envelope {
            flags,
            msg_id,
            engine,
            principal: self.credential.principal.clone(),
            nonce: if flags.privacy {
                rand::random()
            } else {
                [0u8; NONCE_LEN]
            },
            body: Vec::new(),
            mac: None,
        };
        envelope.validate()?;

        let plaintext = pdu.to_bytes();
        envelope.body = if flags.privacy {
            self.keys
                .encrypt(&envelope.nonce, &envelope.header_bytes(), &plaintext)?
        } else {
            plaintext
        };
        if flags.auth {
            envelope.mac = Some(self.keys.sign(&envelope.signed_bytes()));
        }
        Ok(envelope)
    }

    /// Verify the MAC and decrypt, returning the encoded PDU
    pub fn unseal(&self, envelope: &Envelope) -> Result<Vec<u8>, SecurityError> {
        if envelope.flags.auth {
            let mac = envelope.mac.ok_or(SecurityError::WrongDigest)?;
            if !self.keys.verify(&envelope.signed_bytes(), &mac) {
                return Err(SecurityError::WrongDigest);
            }
        }
        if envelope.flags.privacy {
            self.keys
                .decrypt(&envelope.nonce, &envelope.header_bytes(), &envelope.body)
        } else {
            Ok(envelope.body.clone())
        }
    }
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), SecurityError> {
    if len > max {
        return Err(SecurityError::FieldTooLong { field, max });
    }
    Ok(())
}

/// Counter OID reported for a rejection
pub fn report_oid(error: SecurityError) -> Option<Oid> {
    let leaf = match error {
        SecurityError::UnsupportedSecLevel => 1,
        SecurityError::NotInTimeWindow => 2,
        SecurityError::UnknownUserName => 3,
        SecurityError::UnknownEngineId => 4,
        SecurityError::WrongDigest => 5,
        SecurityError::DecryptionError => 6,
        SecurityError::EncryptionError
        | SecurityError::FieldTooLong { .. }
        | SecurityError::EmptyEngineId => return None,
    };
    Some(Oid::new(USM_STATS).child(leaf).child(0))
}

/// Rejection named by a report counter OID
pub fn report_error(oid: &Oid) -> Option<SecurityError> {
    let components = oid.components();
    if components.len() != USM_STATS.len() + 2 || !components.starts_with(USM_STATS) {
        return None;
    }
    match components[USM_STATS.len()] {
        1 => Some(SecurityError::UnsupportedSecLevel),
        2 => Some(SecurityError::NotInTimeWindow),
        3 => Some(SecurityError::UnknownUserName),
        4 => Some(SecurityError::UnknownEngineId),
        5 => Some(SecurityError::WrongDigest),
        6 => Some(SecurityError::DecryptionError),
        _ => None,
    }
}

/// Token bucket rate limiter, one bucket per caller
///
/// A new caller starts with a full bucket of `burst` tokens; each request
/// consumes one token and tokens refill continuously at `rate` per second.
/// Checks never block: an empty bucket yields the wait until the next token.
#[derive(Debug)]
pub struct RateLimiter<K> {
    /// Tokens per second
    rate: f64,
    /// Maximum burst size
    burst: f64,
    /// Current tokens and last refill per caller
    buckets: HashMap<K, (f64, Instant)>,
}

impl<K: Hash + Eq> RateLimiter<K> {
    /// Buckets above this count trigger eviction of idle callers
    const EVICT_THRESHOLD: usize = 4096;

    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `rate` - Tokens (requests) allowed per second
    /// * `burst` - Maximum tokens that can accumulate
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate: rate.max(0.0),
            burst: burst.max(0.0),
            buckets: HashMap::new(),
        }
    }

    /// `limit` requests per minute, all of which may arrive at once
    pub fn per_minute(limit: u32) -> Self {
        Self::new(f64::from(limit) / 60.0, f64::from(limit))
    }

    /// Check if a request is allowed for a caller
    ///
    /// Consumes a token and returns `Ok` if allowed, otherwise returns the
    /// time until a token is available.
    pub fn check(&mut self, key: K, now: Instant) -> Result<(), Duration> {
        if self.buckets.len() > Self::EVICT_THRESHOLD {
            self.evict_idle(now);
        }

        let (tokens, last) = self.buckets.entry(key).or_insert((self.burst, now));

        // Refill tokens based on elapsed time
        let elapsed = now.saturating_duration_since(*last).as_secs_f64();
        *tokens = (*tokens + elapsed * self.rate).min(self.burst);
        *last = now;

        if *tokens >= 1.0 {
            *tokens -= 1.0;
            Ok(())
        } else if self.rate > 0.0 {
            Err(Duration::from_secs_f64((1.0 - *tokens) / self.rate))
        } else {
            Err(Duration::from_secs(60))
        }
    }

    /// Tokens left for a caller, as of its last request
    pub fn remaining(&self, key: &K) -> f64 {
        self.buckets.get(key).map_or(self.burst, |(tokens, _)| *tokens)
    }

    /// Forget a caller
    pub fn reset(&mut self, key: &K) {
        self.buckets.remove(key);
    }

    /// Number of callers tracked
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }

    /// Drop callers whose bucket would be full again
    pub fn evict_idle(&mut self, now: Instant) {
        let (rate, burst) = (self.rate, self.burst);
        self.buckets.retain(|_, (tokens, last)| {
            let elapsed = now.saturating_duration_since(*last).as_secs_f64();
            *tokens + elapsed * rate < burst
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{Pdu, PduKind};

    fn engine() -> EngineParams {
        EngineParams::new(b"dme-engine-01".to_vec(), 1, 500)
    }

    fn context() -> SecurityContext {
        SecurityContext::new(
            TransportCredential::new("dmeuser", "authpassword", "privpassword"),
            &engine().engine_id,
        )
    }

    fn get_pdu() -> Pdu {
        Pdu::get(42, ["1.3.6.1.4.1.32275.2.1.2.2.5.36".parse().unwrap()])
    }

    #[test]
    fn test_flags_levels() {
        for level in [
            SecurityLevel::NoAuthNoPriv,
            SecurityLevel::AuthNoPriv,
            SecurityLevel::AuthPriv,
        ] {
            let flags = MsgFlags::for_level(level, true);
            assert_eq!(flags.level(), level);
            assert_eq!(MsgFlags::from_u8(flags.to_u8()), Some(flags));
        }
        // priv without auth, unknown bits
        assert_eq!(MsgFlags::from_u8(0x02), None);
        assert_eq!(MsgFlags::from_u8(0x10), None);
        assert!(SecurityLevel::AuthPriv > SecurityLevel::AuthNoPriv);
    }

    #[test]
    fn test_keys_are_localized() {
        let credential = TransportCredential::new("dmeuser", "authpassword", "privpassword");
        let a = credential.localize(b"engine-a");
        let b = credential.localize(b"engine-b");
        assert_ne!(a, b);
        assert_eq!(a, credential.localize(b"engine-a"));
    }

    #[test]
    fn test_credential_debug_redacts_secrets() {
        let credential = TransportCredential::new("dmeuser", "authpassword", "privpassword");
        let debug = format!("{:?}", credential);
        assert!(debug.contains("dmeuser"));
        assert!(!debug.contains("authpassword"));
        assert!(!debug.contains("privpassword"));
    }

    #[test]
    fn test_secret_length() {
        assert!(TransportCredential::new("u", "12345678", "abcdefgh").secrets_valid());
        assert!(!TransportCredential::new("u", "1234567", "abcdefgh").secrets_valid());
    }

    #[test]
    fn test_seal_unseal_auth_priv() {
        let ctx = context();
        let pdu = get_pdu();
        let envelope = ctx.seal(7, engine(), true, &pdu).unwrap();

        assert!(envelope.flags.auth && envelope.flags.privacy);
        // body is ciphertext, not the encoded PDU
        assert_ne!(envelope.body, pdu.to_bytes());

        let wire = envelope.to_bytes();
        let parsed = Envelope::from_bytes(&wire).unwrap();
        assert_eq!(parsed, envelope);
        let plaintext = ctx.unseal(&parsed).unwrap();
        assert_eq!(Pdu::from_bytes(&plaintext).unwrap(), pdu);
    }

    #[test]
    fn test_tampered_message_rejected() {
        let ctx = context();
        let wire = ctx.seal(7, engine(), true, &get_pdu()).unwrap().to_bytes();

        // flip a bit inside the body
        let mut tampered = wire.clone();
        let body_byte = tampered.len() - MAC_LEN - 1;
        tampered[body_byte] ^= 0x01;
        let parsed = Envelope::from_bytes(&tampered).unwrap();
        assert_eq!(ctx.unseal(&parsed), Err(SecurityError::WrongDigest));
    }

    #[test]
    fn test_wrong_privacy_key_fails_decryption() {
        let sender = context();
        let envelope = sender.seal(7, engine(), true, &get_pdu()).unwrap();

        let receiver = SecurityContext::new(
            TransportCredential::new("dmeuser", "authpassword", "otherprivkey"),
            &engine().engine_id,
        );
        assert_eq!(receiver.unseal(&envelope), Err(SecurityError::DecryptionError));
    }

    #[test]
    fn test_wrong_auth_key_fails_digest() {
        let sender = context();
        let envelope = sender.seal(7, engine(), true, &get_pdu()).unwrap();

        let receiver = SecurityContext::new(
            TransportCredential::new("dmeuser", "wrongpassword", "privpassword"),
            &engine().engine_id,
        );
        assert_eq!(receiver.unseal(&envelope), Err(SecurityError::WrongDigest));
    }

    #[test]
    fn test_discovery_envelope() {
        let discovery = Envelope::discovery(1, &Pdu::get(1, []));
        assert!(discovery.flags.reportable);
        assert!(!discovery.flags.auth);
        assert!(discovery.engine.engine_id.is_empty());

        let parsed = Envelope::from_bytes(&discovery.to_bytes()).unwrap();
        assert_eq!(parsed.mac, None);
        let pdu = Pdu::from_bytes(&parsed.body).unwrap();
        assert_eq!(pdu.kind, PduKind::Get);
    }

    #[test]
    fn test_envelope_decode_errors() {
        let wire = context().seal(7, engine(), true, &get_pdu()).unwrap().to_bytes();

        let mut bad_version = wire.clone();
        bad_version[0] = 1;
        assert_eq!(
            Envelope::from_bytes(&bad_version),
            Err(DecodeError::UnsupportedVersion(1))
        );

        for cut in 0..wire.len() {
            assert!(Envelope::from_bytes(&wire[..cut]).is_err());
        }

        let mut trailing = wire;
        trailing.push(0);
        assert_eq!(
            Envelope::from_bytes(&trailing),
            Err(DecodeError::TrailingData(1))
        );
    }

    #[test]
    fn test_oversized_principal_refused_by_seal() {
        let long = TransportCredential::new("u".repeat(256), "authpassword", "privpassword");
        assert_eq!(
            long.validate(),
            Err(SecurityError::FieldTooLong {
                field: "principal",
                max: MAX_PRINCIPAL_LEN
            })
        );
        let ctx = SecurityContext::new(long, &engine().engine_id);
        assert_eq!(
            ctx.seal(7, engine(), true, &get_pdu()),
            Err(SecurityError::FieldTooLong {
                field: "principal",
                max: MAX_PRINCIPAL_LEN
            })
        );

        // the longest accepted principal still decodes
        let edge = TransportCredential::new("u".repeat(MAX_PRINCIPAL_LEN), "authpassword", "privpassword");
        assert!(edge.validate().is_ok());
        let ctx = SecurityContext::new(edge, &engine().engine_id);
        let wire = ctx.seal(7, engine(), true, &get_pdu()).unwrap().to_bytes();
        assert!(Envelope::from_bytes(&wire).is_ok());
    }

    #[test]
    fn test_oversized_engine_id_refused_by_seal() {
        let engine = EngineParams::new(vec![7u8; MAX_ENGINE_ID_LEN + 1], 1, 500);
        let ctx = SecurityContext::new(
            TransportCredential::new("dmeuser", "authpassword", "privpassword"),
            &engine.engine_id,
        );
        assert_eq!(
            ctx.seal(7, engine, true, &get_pdu()),
            Err(SecurityError::FieldTooLong {
                field: "engine id",
                max: MAX_ENGINE_ID_LEN
            })
        );
    }

    #[test]
    fn test_time_window() {
        let engine = engine();
        assert!(engine.in_time_window(1, 500));
        assert!(engine.in_time_window(1, 650));
        assert!(engine.in_time_window(1, 350));
        assert!(!engine.in_time_window(1, 651));
        assert!(!engine.in_time_window(2, 500));
    }

    #[test]
    fn test_report_oids() {
        let oid = report_oid(SecurityError::UnknownEngineId).unwrap();
        assert_eq!(oid.to_string(), "1.3.6.1.6.3.15.1.1.4.0");
        for error in [
            SecurityError::UnsupportedSecLevel,
            SecurityError::NotInTimeWindow,
            SecurityError::UnknownUserName,
            SecurityError::UnknownEngineId,
            SecurityError::WrongDigest,
            SecurityError::DecryptionError,
        ] {
            assert_eq!(report_error(&report_oid(error).unwrap()), Some(error));
        }
        assert_eq!(report_oid(SecurityError::EncryptionError), None);
        assert_eq!(
            report_oid(SecurityError::FieldTooLong {
                field: "principal",
                max: MAX_PRINCIPAL_LEN
            }),
            None
        );
        assert_eq!(report_error(&"1.3.6.1.4.1".parse().unwrap()), None);
    }

    #[test]
    fn test_rate_limiter_burst() {
        let mut limiter = RateLimiter::per_minute(10);
        let now = Instant::now();

        // First 10 should pass (burst)
        for i in 0..10 {
            assert!(limiter.check(1u32, now).is_ok(), "Request {} should pass", i);
        }

        // 11th should fail, with a wait of one refill period
        let wait = limiter.check(1, now).unwrap_err();
        assert!(wait > Duration::from_secs(5) && wait <= Duration::from_millis(6001));
    }

    #[test]
    fn test_rate_limiter_refill() {
        let mut limiter = RateLimiter::per_minute(30);
        let now = Instant::now();

        for _ in 0..30 {
            limiter.check(1u32, now).unwrap();
        }
        assert!(limiter.check(1, now).is_err());

        // 2 seconds later one token has refilled
        let later = now + Duration::from_secs(2);
        assert!(limiter.check(1, later).is_ok());
        assert!(limiter.check(1, later).is_err());
    }

    #[test]
    fn test_rate_limiter_per_caller() {
        let mut limiter = RateLimiter::per_minute(1);
        let now = Instant::now();

        assert!(limiter.check("10.0.0.1", now).is_ok());
        assert!(limiter.check("10.0.0.1", now).is_err());
        assert!(limiter.check("10.0.0.2", now).is_ok());
        assert_eq!(limiter.tracked(), 2);

        limiter.reset(&"10.0.0.1");
        assert!(limiter.check("10.0.0.1", now).is_ok());
    }

    #[test]
    fn test_rate_limiter_zero_limit() {
        let mut limiter = RateLimiter::per_minute(0);
        assert_eq!(
            limiter.check(1u32, Instant::now()),
            Err(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_rate_limiter_evicts_idle() {
        let mut limiter = RateLimiter::per_minute(60);
        let now = Instant::now();
        limiter.check(1u32, now).unwrap();
        limiter.check(2u32, now + Duration::from_millis(500)).unwrap();

        limiter.evict_idle(now + Duration::from_millis(1200));
        assert_eq!(limiter.tracked(), 1);
        assert!(limiter.remaining(&2) < 60.0);
    }
}
