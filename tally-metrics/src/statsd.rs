use tally_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics for the aggregator.
pub enum MetricCounters {
    /// Incremented for every datagram merged into the store.
    DatagramsMerged,

    /// Incremented for every specification rejected for a missing type.
    BadLines,

    /// Number of lines written to Graphite reports.
    FlushedLines,

    /// Number of keys written by the key-flush sampler.
    ///
    /// Tagged by `result`, which is `ok` or `failed`.
    KeyFlushWritten,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::DatagramsMerged => "aggregator.datagrams",
            Self::BadLines => "aggregator.bad_lines",
            Self::FlushedLines => "aggregator.flush.lines",
            Self::KeyFlushWritten => "aggregator.key_flush.keys",
        }
    }
}

/// Timer metrics for the aggregator.
pub enum MetricTimers {
    /// Time spent computing a flush, excluding the push to the sink.
    FlushDuration,

    /// Time spent handling a single message of the aggregator service.
    ///
    /// Tagged by `message`.
    AggregatorServiceDuration,
}

impl TimerMetric for MetricTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::FlushDuration => "aggregator.flush.duration",
            Self::AggregatorServiceDuration => "aggregator.message.duration",
        }
    }
}

/// Gauge metrics for the aggregator.
pub enum MetricGauges {
    /// Number of entries retained in the history ring.
    HistoryLength,

    /// Number of series emitted by the last flush.
    NumStats,
}

impl GaugeMetric for MetricGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::HistoryLength => "aggregator.history.length",
            Self::NumStats => "aggregator.flush.num_stats",
        }
    }
}
