use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tally_common::UnixTimestamp;
use tally_config::Config;
use tally_metrics::{Aggregator, AggregatorService};
use tally_system::{Addr, ServiceRunner};

use crate::services::server::ServerError;
use crate::services::signals::SignalService;
use crate::services::sink::{Sink, SinkAddr, SinkService};
use crate::services::udp::UdpService;

#[derive(Debug)]
struct StateInner {
    config: Arc<Config>,
    aggregator: Addr<Aggregator>,
    sink: Addr<Sink>,
    startup_time: UnixTimestamp,
}

/// Server state shared by all HTTP endpoints.
///
/// Holds the configuration and the addresses of the worker's services. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Starts all worker services except the HTTP server and returns the shared state.
    pub fn start(config: Arc<Config>, runner: &mut ServiceRunner) -> Result<Self, ServerError> {
        let startup_time = UnixTimestamp::now();

        let sink_addr = config.sink_addr().map(|(host, port)| SinkAddr {
            host: host.to_owned(),
            port,
        });
        if sink_addr.is_none() {
            tally_log::warn!("no sink host configured, flush reports will be dropped");
        }

        let sink = runner.start(SinkService::new(sink_addr, startup_time));
        let aggregator = runner.start(AggregatorService::new(
            config.collector().clone(),
            Some(sink.clone().recipient()),
            startup_time,
        ));

        runner.start(UdpService::new(&config, aggregator.clone())?);
        runner.start(SignalService::new(aggregator.clone()));

        Ok(Self::new(config, aggregator, sink, startup_time))
    }

    /// Creates state from already running services.
    pub fn new(
        config: Arc<Config>,
        aggregator: Addr<Aggregator>,
        sink: Addr<Sink>,
        startup_time: UnixTimestamp,
    ) -> Self {
        Self {
            inner: Arc::new(StateInner {
                config,
                aggregator,
                sink,
                startup_time,
            }),
        }
    }

    /// Returns the worker configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the address of the [`AggregatorService`].
    pub fn aggregator(&self) -> &Addr<Aggregator> {
        &self.inner.aggregator
    }

    /// Returns the address of the [`SinkService`].
    pub fn sink(&self) -> &Addr<Sink> {
        &self.inner.sink
    }

    /// Returns when this worker started.
    pub fn startup_time(&self) -> UnixTimestamp {
        self.inner.startup_time
    }
}

impl FromRequestParts<Self> for ServiceState {
    type Rejection = Infallible;

    async fn from_request_parts(_: &mut Parts, state: &Self) -> Result<Self, Self::Rejection> {
        Ok(state.clone())
    }
}
