use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A value tagged with its metric key.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct KeyedValue<T> {
    /// The normalized metric key.
    pub key: String,
    /// The flushed value.
    pub value: T,
}

/// Flushed counter total and its per-second rate.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterValue {
    /// Total of the flush window.
    pub value: f64,
    /// Total divided by the flush interval in seconds.
    pub value_per_second: f64,
}

/// Mean and upper bound of the samples below a percentile threshold.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct PercentileValue {
    /// Mean of the samples within the threshold.
    pub mean: f64,
    /// Largest sample within the threshold.
    pub upper: f64,
}

/// A percentile summary labelled with its threshold.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TimerPercentile {
    /// The threshold label, with `.` replaced by `_`.
    pub pct: String,
    /// The summary for this threshold.
    pub value: PercentileValue,
}

/// Flushed summary of a timer.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TimerValue {
    /// Largest sample.
    pub upper: f64,
    /// Smallest sample.
    pub lower: f64,
    /// Number of samples.
    pub count: usize,
    /// One summary per configured threshold.
    pub pcts: Vec<TimerPercentile>,
}

/// Immutable summary of one flush.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Flush time in milliseconds since the UNIX epoch.
    pub ts: u64,
    /// Number of series emitted by the flush.
    pub num_stats: usize,
    /// Flushed counters.
    pub counters: Vec<KeyedValue<CounterValue>>,
    /// Flushed timers with samples.
    pub timers: Vec<KeyedValue<TimerValue>>,
    /// Gauge values at flush time.
    pub gauges: Vec<KeyedValue<f64>>,
}

fn filter_keyed<T: Clone>(values: &[KeyedValue<T>], filter: &str) -> Vec<KeyedValue<T>> {
    values
        .iter()
        .filter(|keyed| keyed.key.contains(filter))
        .cloned()
        .collect()
}

impl HistoryEntry {
    /// Returns a copy retaining only values whose key contains `filter`.
    ///
    /// `ts` and `num_stats` are preserved even if all arrays end up empty.
    pub fn filtered(&self, filter: &str) -> Self {
        Self {
            ts: self.ts,
            num_stats: self.num_stats,
            counters: filter_keyed(&self.counters, filter),
            timers: filter_keyed(&self.timers, filter),
            gauges: filter_keyed(&self.gauges, filter),
        }
    }
}

/// Result of a history query.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct HistoryResponse {
    /// The flush interval in milliseconds.
    pub interval: u64,
    /// Matching entries, oldest first.
    pub results: Vec<HistoryEntry>,
}

/// Bounded FIFO of past flush summaries.
#[derive(Debug)]
pub struct HistoryRing {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryRing {
    /// Creates an empty ring retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Appends an entry and evicts the oldest ones beyond capacity.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Returns the number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no flush has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns filtered copies of the retained entries.
    ///
    /// With a non-zero `limit`, only the last `limit` entries are returned.
    pub fn query(&self, filter: &str, limit: usize) -> Vec<HistoryEntry> {
        let skip = match limit {
            0 => 0,
            limit => self.entries.len().saturating_sub(limit),
        };

        self.entries
            .iter()
            .skip(skip)
            .map(|entry| entry.filtered(filter))
            .collect()
    }
}
