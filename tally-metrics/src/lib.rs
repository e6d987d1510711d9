//! Metric ingestion, aggregation and flushing for Tally.
//!
//! Clients send statsd datagrams over UDP. Each datagram names a single key followed by one or
//! more specifications:
//!
//! ```text
//! api.requests:1|c|@0.1:250|ms:42|g
//! ```
//!
//! The [`Datagram`] parser turns this into typed [`MetricUpdate`]s which are applied to the
//! [`MetricStore`]. Once per flush interval, the [`AggregatorService`] summarizes the store into a
//! Graphite plaintext report:
//!
//! ```text
//! stats.api.requests 1 1700000000
//! stats_counts.api.requests 10 1700000000
//! stats.timers.api.requests.mean_90 250 1700000000
//! ...
//! statsd.numStats 3 1700000000
//! ```
//!
//! The summary of every flush is retained in a bounded [`HistoryRing`] for queries.
//!
//! # Metric Types
//!
//! - **Counters** (`c`) accumulate values divided by their sample rate and reset to `0` after
//!   every flush. Reports include the total and the rate per second.
//! - **Timers** (`ms`) collect samples. Reports include the extremes, the count and the mean and
//!   upper bound below each configured percentile threshold.
//! - **Gauges** (`g`) keep the last written value across flushes.

#![warn(missing_docs)]

mod aggregation;
mod aggregator;
mod aggregatorservice;
mod history;
mod keyflush;
mod protocol;
mod snapshot;
mod statsd;
mod store;

pub use self::aggregation::*;
pub use self::aggregator::{AggregatorConfig, FlushStats};
pub use self::aggregatorservice::*;
pub use self::history::*;
pub use self::keyflush::*;
pub use self::protocol::*;
pub use self::snapshot::*;
pub use self::store::*;
