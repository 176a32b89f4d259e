// DME Agent - Telemetry simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # DME Agent
//!
//! Simulated DME exposing its telemetry over two independent transports:
//!
//! - **Secured**: authenticated and encrypted polling over UDP
//! - **Plain**: rate-limited JSON over HTTP
//!
//! A background task perturbs the volatile metrics on a fixed period. Both
//! servers read the same [`MetricStore`].

pub mod config;
pub mod error;
pub mod http;
pub mod secure;
pub mod simulation;

pub use config::{AgentConfig, Args};
pub use error::{AgentError, ConfigError, Result};

use dme::{MetricStore, ResponderConfig, SecureResponder, Updater};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A started agent
#[derive(Debug)]
pub struct RunningAgent {
    /// Shared metric values
    pub store: Arc<MetricStore>,
    /// Secured-transport responder
    pub responder: Arc<SecureResponder>,
    /// Bound address of the secured transport
    pub secure_addr: SocketAddr,
    /// Bound address of the plain HTTP service
    pub http_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningAgent {
    /// Stop every task of the agent
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Bind both servers and start serving
///
/// Fails if either port cannot be bound; nothing is left running then.
pub async fn start(config: AgentConfig) -> Result<RunningAgent> {
    let store = Arc::new(MetricStore::dme());

    let mut responder_config = ResponderConfig::new(config.credential.clone(), config.view.clone());
    if let Some(engine_id) = config.engine_id.clone() {
        responder_config = responder_config
            .with_engine_id(engine_id)
            .map_err(|e| ConfigError::invalid("engine-id", e.to_string()))?;
    }
    let responder = Arc::new(SecureResponder::new(Arc::clone(&store), responder_config));

    let secure = secure::SecureServer::bind(config.secure_addr, Arc::clone(&responder)).await?;
    let secure_addr = secure.local_addr()?;

    let listener = TcpListener::bind(config.http_addr)
        .await
        .map_err(|source| AgentError::Bind {
            transport: "plain",
            addr: config.http_addr,
            source,
        })?;
    let http_addr = listener.local_addr()?;

    let state = Arc::new(http::HttpState::new(
        Arc::clone(&store),
        config.oid_rate_per_min,
        config.all_rate_per_min,
    ));
    let app = http::router(state);

    let mut tasks = Vec::with_capacity(3);
    tasks.push(tokio::spawn(simulation::run_updater(
        Arc::clone(&store),
        config.update_interval,
        Updater::new(),
    )));
    tasks.push(tokio::spawn(secure.run()));
    tasks.push(tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            error!(error = %e, "HTTP server stopped");
        }
    }));

    info!(
        %secure_addr,
        %http_addr,
        update_interval_secs = config.update_interval.as_secs(),
        view = %config.view,
        "DME agent started"
    );

    Ok(RunningAgent {
        store,
        responder,
        secure_addr,
        http_addr,
        tasks,
    })
}
