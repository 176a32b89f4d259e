// DME Agent - Telemetry simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! UDP server of the secured transport
//!
//! Each datagram is handled inline: handling is CPU-only and short, and the
//! store lock is released before the answer is sent.

use crate::error::{AgentError, Result};
use dme::SecureResponder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Largest datagram accepted
pub const MAX_DATAGRAM: usize = 65_507;

/// Secured-transport server bound to a UDP port
#[derive(Debug)]
pub struct SecureServer {
    socket: UdpSocket,
    responder: Arc<SecureResponder>,
}

impl SecureServer {
    /// Bind the server socket
    pub async fn bind(addr: SocketAddr, responder: Arc<SecureResponder>) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| AgentError::Bind {
                transport: "secured",
                addr,
                source,
            })?;
        Ok(Self { socket, responder })
    }

    /// Bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve until the task is cancelled
    pub async fn run(self) {
        if let Ok(addr) = self.socket.local_addr() {
            info!(%addr, engine_id = %hex::encode(self.responder.engine_id()), "Secured transport listening");
        }
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    // e.g. ICMP port unreachable surfacing on some platforms
                    warn!(error = %e, "UDP receive failed");
                    continue;
                }
            };

            let Some(answer) = self.responder.handle(&buf[..len]) else {
                continue;
            };
            debug!(%peer, request_len = len, answer_len = answer.len(), "answering");
            if let Err(e) = self.socket.send_to(&answer, peer).await {
                warn!(%peer, error = %e, "UDP send failed");
            }
        }
    }
}
