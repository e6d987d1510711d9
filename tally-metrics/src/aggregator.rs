//! Core of the aggregator: the metric store, the history ring and the last report.

use tally_common::UnixTimestamp;

use crate::aggregation;
use crate::history::{HistoryResponse, HistoryRing};
use crate::keyflush;
use crate::protocol::Datagram;
use crate::snapshot::Snapshot;
use crate::store::{CurrentMetrics, MetricStore};

/// Parameters of the [`Aggregator`].
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatorConfig {
    /// Length of a flush window in milliseconds.
    pub flush_interval: u64,
    /// Percentile thresholds computed for every timer.
    pub percent_threshold: Vec<f64>,
    /// Maximum number of retained history entries.
    pub history_len: usize,
    /// Whether key observations are recorded for key-flush sampling.
    pub track_keys: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_interval: 10_000,
            percent_threshold: vec![90.0],
            history_len: 360,
            track_keys: false,
        }
    }
}

/// Outcome of a flush for instrumentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushStats {
    /// Number of lines in the report.
    pub lines: usize,
    /// Number of series in the report.
    pub num_stats: usize,
}

/// A metrics aggregator for one flush window at a time.
///
/// Owns all live metrics and past flush summaries. The aggregator performs no I/O and does not
/// read the clock, all times are passed in by the caller.
#[derive(Debug)]
pub struct Aggregator {
    config: AggregatorConfig,
    store: MetricStore,
    history: HistoryRing,
    last_report: String,
    startup_time: UnixTimestamp,
}

impl Aggregator {
    /// Creates an empty aggregator.
    pub fn new(config: AggregatorConfig, startup_time: UnixTimestamp) -> Self {
        Self {
            store: MetricStore::new(startup_time),
            history: HistoryRing::new(config.history_len),
            last_report: String::new(),
            startup_time,
            config,
        }
    }

    /// Returns the live metrics.
    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// Applies a parsed datagram received at `received`.
    ///
    /// Returns the number of bad lines in the datagram.
    pub fn merge_datagram(&mut self, datagram: &Datagram, received: UnixTimestamp) -> usize {
        self.store
            .apply_datagram(datagram, self.config.track_keys, received)
    }

    /// Flushes the current window at `now_ms`.
    ///
    /// The report replaces the [last report](Self::last_report) and its summary is appended to the
    /// history.
    pub fn flush(&mut self, now_ms: u64) -> FlushStats {
        let report = aggregation::flush_store(
            &mut self.store,
            self.config.flush_interval,
            &self.config.percent_threshold,
            now_ms,
        );

        let stats = FlushStats {
            lines: report.lines,
            num_stats: report.entry.num_stats,
        };

        self.history.push(report.entry);
        self.last_report = report.text;
        stats
    }

    /// Returns the text of the most recent report, or an empty string before the first flush.
    pub fn last_report(&self) -> &str {
        &self.last_report
    }

    /// Returns the number of retained history entries.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Queries the history. See [`HistoryRing::query`].
    pub fn history(&self, filter: &str, limit: usize) -> HistoryResponse {
        HistoryResponse {
            interval: self.config.flush_interval,
            results: self.history.query(filter, limit),
        }
    }

    /// Drains the key frequencies and returns the top `percent` keys by count.
    pub fn take_top_keys(&mut self, percent: f64) -> Vec<(String, u64)> {
        keyflush::rank_keys(self.store.take_key_frequencies(), percent)
    }

    /// Returns a persistable snapshot of the live metrics.
    ///
    /// Counters and timers only hold values received since the last flush.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.store.snapshot_current(""), self.startup_time)
    }

    /// Merges persisted metrics into the store.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.store.restore(snapshot.into_metrics());
    }

    /// Returns all live metrics matching `filter`.
    pub fn current(&self, filter: &str) -> CurrentMetrics {
        self.store.snapshot_current(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(history_len: usize) -> Aggregator {
        let config = AggregatorConfig {
            history_len,
            track_keys: true,
            ..Default::default()
        };
        Aggregator::new(config, UnixTimestamp::from_secs(1_700_000_000))
    }

    fn merge(aggregator: &mut Aggregator, payload: &[u8]) {
        aggregator.merge_datagram(
            &Datagram::parse(payload),
            UnixTimestamp::from_secs(1_700_000_001),
        );
    }

    #[test]
    fn test_flush_records_history_and_report() {
        let mut aggregator = aggregator(3);
        merge(&mut aggregator, b"a:1|c");

        assert_eq!(aggregator.last_report(), "");
        let stats = aggregator.flush(1_700_000_010_000);

        assert_eq!(
            stats,
            FlushStats {
                lines: 3,
                num_stats: 1
            }
        );
        assert_eq!(
            aggregator.last_report(),
            "stats.a 0.1 1700000010\nstats_counts.a 1 1700000010\nstatsd.numStats 1 1700000010\n"
        );

        let history = aggregator.history("", 0);
        assert_eq!(history.interval, 10_000);
        assert_eq!(history.results.len(), 1);
        assert_eq!(history.results[0].ts, 1_700_000_010_000);
    }

    #[test]
    fn test_history_keeps_last_flushes() {
        let mut aggregator = aggregator(3);
        for i in 1..=5u64 {
            merge(&mut aggregator, b"a:1|c");
            aggregator.flush(1_700_000_000_000 + i * 10_000);
        }

        assert_eq!(aggregator.history_len(), 3);
        let ts: Vec<_> = aggregator
            .history("", 0)
            .results
            .iter()
            .map(|entry| entry.ts)
            .collect();
        assert_eq!(ts, [1_700_000_030_000, 1_700_000_040_000, 1_700_000_050_000]);
    }

    #[test]
    fn test_top_keys() {
        let mut aggregator = aggregator(3);
        merge(&mut aggregator, b"a:1|c");
        merge(&mut aggregator, b"b:1|c");
        merge(&mut aggregator, b"b:2|ms");

        let top = aggregator.take_top_keys(100.0);
        assert_eq!(top, [("b".to_owned(), 2), ("a".to_owned(), 1)]);
        assert!(aggregator.take_top_keys(100.0).is_empty());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut first = aggregator(3);
        merge(&mut first, b"hits:2|c:9|g");

        let mut second = aggregator(3);
        second.restore(first.snapshot());

        let current = second.current("");
        assert_eq!(current.counters["hits"], 2.0);
        assert_eq!(current.gauges["hits"], 9.0);
    }
}
