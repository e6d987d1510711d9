//! The Tally worker.
//!
//! This crate contains the [`run`] function which starts a worker process. A worker listens for
//! statsd datagrams over UDP, aggregates them, pushes flush reports to the downstream sink and
//! serves the query API over HTTP.
//!
//! # Services
//!
//! All services run on a single-threaded runtime and communicate through messages:
//!
//! ```text
//!  UDP ──MergeDatagram──▶ Aggregator ──ForwardReport──▶ Sink ──TCP──▶ Graphite
//!                           ▲
//!  HTTP ──GetCounters, GetHistory, ...
//!  SIGUSR1 ──ToggleDebug
//! ```
//!
//! The aggregator owns all metric state. See [`tally_metrics`] for the flush algorithm.
//!
//! # Shutdown
//!
//! The worker stops on `SIGTERM`, `SIGHUP`, `SIGINT` or `SIGQUIT`. The UDP listener closes, the
//! HTTP server finishes open requests, and the aggregator writes its snapshot before the process
//! exits.

#![warn(missing_docs)]

mod endpoints;
mod extractors;
mod middlewares;
mod service;
mod services;
mod statsd;

#[cfg(test)]
mod testutils;

use std::sync::Arc;

use anyhow::Context;
use tally_config::Config;
use tally_system::{Controller, ServiceRunner};

pub use self::service::ServiceState;
pub use self::services::server::{HttpServer, ServerError};

/// Runs a worker with the given configuration until it is shut down.
///
/// Returns an error if a listener cannot be bound or if any service panics.
pub fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create the runtime")?;

    runtime.block_on(async move {
        Controller::start(config.shutdown_timeout());

        let mut runner = ServiceRunner::new();
        let state = ServiceState::start(config.clone(), &mut runner)?;
        runner.start(HttpServer::new(&config, state)?);

        tally_log::info!("worker started with {} services", runner.len());
        runner.join().await?;
        tally_log::info!("worker shut down");

        Ok(())
    })
}
