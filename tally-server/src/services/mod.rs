//! The services of a Tally worker.
//!
//! - [`udp::UdpService`] receives datagrams and forwards them to the aggregator.
//! - [`sink::SinkService`] pushes flush reports to the downstream sink.
//! - [`server::HttpServer`] hosts the query API.
//! - [`signals::SignalService`] toggles the aggregator's debug output on `SIGUSR1`.
//!
//! The aggregator itself lives in [`tally_metrics::AggregatorService`].

pub mod server;
pub mod signals;
pub mod sink;
pub mod udp;
