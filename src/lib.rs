//! # DME - Telemetry model of a Distance Measuring Equipment
//!
//! Shared core of the DME telemetry simulator and its collector.
//!
//! ## Key Features
//!
//! - **Fixed Schema**: 26 named metrics with OIDs, ranges and a canonical order
//! - **Bounded Random Walk**: volatile metrics drift but never leave their range
//! - **Secured Polling**: authenticated and encrypted request/response protocol
//!   with engine discovery and a transport-free responder
//! - **Normalized Records**: fixed-width collection records for durable logging
//!
//! ## Quick Start
//!
//! ```rust
//! use dme::{ClientSession, MetricStore, SecureResponder, TransportCredential, Updater};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MetricStore::dme());
//! let credential = TransportCredential::new("dmeuser", "authpassword", "privpassword");
//! let responder = SecureResponder::dme(Arc::clone(&store), credential.clone());
//!
//! // Drift the volatile metrics once
//! Updater::seeded(1).step(&store);
//!
//! // Discover the engine, then read every metric
//! let mut session = ClientSession::new(credential);
//! let discovery = session.discovery_request();
//! let report = responder.handle(&discovery.bytes).unwrap();
//! session.complete_discovery(&discovery, &report).unwrap();
//!
//! let request = session.seal(session.get(store.schema().oids())).unwrap();
//! let answer = responder.handle(&request.bytes).unwrap();
//! let response = session.open_response(&request, &answer).unwrap();
//! assert_eq!(response.varbinds.len(), 26);
//! ```
//!
//! ## Modules
//!
//! - [`schema`]: OIDs, metrics and the built-in DME metric set
//! - [`store`]: Thread-safe current values
//! - [`updater`]: Random-walk perturbation
//! - [`record`]: Collection records
//! - [`pdu`]: Protocol data units and their wire format
//! - [`security`]: Credentials, keys, message envelope, rate limiting
//! - [`agent`]: Responder of the secured protocol
//! - [`session`]: Client side of the secured protocol

// Modules
pub mod agent;
pub mod error;
pub mod pdu;
pub mod record;
pub mod schema;
pub mod security;
pub mod session;
pub mod store;
pub mod updater;

// Re-exports for convenient access
pub use agent::{ResponderConfig, SecureResponder, StatsSnapshot, MAX_BULK_VARBINDS};
pub use error::{
    DecodeError, DmeError, Result, SchemaError, SecurityError, SessionError, StoreError,
};
pub use pdu::{ErrorStatus, Pdu, PduKind, Value, VarBind};
pub use record::{format_log_timestamp, CollectionRecord};
pub use schema::{Metric, MetricSet, Oid, Volatility, DME_ENTERPRISE};
pub use security::{
    EngineParams, Envelope, LocalizedKeys, RateLimiter, SecurityContext, SecurityLevel,
    TransportCredential,
};
pub use session::{ClientSession, OutgoingRequest};
pub use store::{MetricStore, Snapshot};
pub use updater::{clamp, UpdateReport, Updater};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
