use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tally_common::UnixTimestamp;

use crate::protocol::{CounterType, Datagram, GaugeType, MetricUpdate, TimerType};

/// Counter totals by key, in first-seen order.
pub type Counters = IndexMap<String, CounterType>;

/// Timer samples by key, in first-seen order.
pub type Timers = IndexMap<String, Vec<TimerType>>;

/// Gauge values by key, in first-seen order.
pub type Gauges = IndexMap<String, GaugeType>;

/// Owned copy of all live metrics, as returned by [`MetricStore::snapshot_current`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CurrentMetrics {
    /// Counter totals of the current window.
    pub counters: Counters,
    /// Timer samples of the current window.
    pub timers: Timers,
    /// Last written gauge values.
    pub gauges: Gauges,
}

/// Bookkeeping about received datagrams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MessageStats {
    /// When the last datagram was processed.
    pub last_msg_seen: UnixTimestamp,
    /// Total number of specifications rejected for a missing type.
    pub bad_lines_seen: u64,
}

/// Returns copies of all entries whose key contains `filter`.
fn filter_map<V: Clone>(map: &IndexMap<String, V>, filter: &str) -> IndexMap<String, V> {
    map.iter()
        .filter(|(key, _)| key.contains(filter))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// In-memory state of all metrics in the current flush window.
///
/// All mutations are infallible and create keys lazily. Keys are expected to be normalized.
#[derive(Debug)]
pub struct MetricStore {
    counters: Counters,
    timers: Timers,
    gauges: Gauges,
    key_frequency: IndexMap<String, u64>,
    stats: MessageStats,
}

impl MetricStore {
    /// Creates an empty store.
    pub fn new(startup_time: UnixTimestamp) -> Self {
        Self {
            counters: IndexMap::new(),
            timers: IndexMap::new(),
            gauges: IndexMap::new(),
            key_frequency: IndexMap::new(),
            stats: MessageStats {
                last_msg_seen: startup_time,
                bad_lines_seen: 0,
            },
        }
    }

    /// Adds `delta / sample_rate` to the counter.
    pub fn apply_counter(&mut self, key: &str, delta: CounterType, sample_rate: f64) {
        let sample_rate = if sample_rate > 0.0 { sample_rate } else { 1.0 };
        *self.counters.entry(key.to_owned()).or_default() += delta / sample_rate;
    }

    /// Appends a sample to the timer.
    pub fn apply_timer(&mut self, key: &str, value: TimerType) {
        self.timers.entry(key.to_owned()).or_default().push(value);
    }

    /// Overwrites the gauge.
    pub fn apply_gauge(&mut self, key: &str, value: GaugeType) {
        match self.gauges.get_mut(key) {
            Some(gauge) => *gauge = value,
            None => {
                self.gauges.insert(key.to_owned(), value);
            }
        }
    }

    /// Counts one datagram naming `key` for key-flush sampling.
    pub fn record_key_observation(&mut self, key: &str) {
        *self.key_frequency.entry(key.to_owned()).or_default() += 1;
    }

    /// Applies all updates of a parsed datagram and updates the message bookkeeping.
    ///
    /// Returns the number of bad lines in the datagram.
    pub fn apply_datagram(
        &mut self,
        datagram: &Datagram,
        track_keys: bool,
        received: UnixTimestamp,
    ) -> usize {
        if track_keys {
            self.record_key_observation(&datagram.key);
        }

        for update in &datagram.updates {
            match *update {
                MetricUpdate::Counter { value, sample_rate } => {
                    self.apply_counter(&datagram.key, value, sample_rate)
                }
                MetricUpdate::Timer(value) => self.apply_timer(&datagram.key, value),
                MetricUpdate::Gauge(value) => self.apply_gauge(&datagram.key, value),
            }
        }

        let bad_lines = datagram.errors.len();
        self.stats.bad_lines_seen += bad_lines as u64;
        self.stats.last_msg_seen = received;
        bad_lines
    }

    /// Returns counters whose key contains `filter`. An empty filter matches all keys.
    pub fn snapshot_counters(&self, filter: &str) -> Counters {
        filter_map(&self.counters, filter)
    }

    /// Returns timers whose key contains `filter`.
    pub fn snapshot_timers(&self, filter: &str) -> Timers {
        filter_map(&self.timers, filter)
    }

    /// Returns gauges whose key contains `filter`.
    pub fn snapshot_gauges(&self, filter: &str) -> Gauges {
        filter_map(&self.gauges, filter)
    }

    /// Returns counters, timers and gauges whose key contains `filter`.
    pub fn snapshot_current(&self, filter: &str) -> CurrentMetrics {
        CurrentMetrics {
            counters: self.snapshot_counters(filter),
            timers: self.snapshot_timers(filter),
            gauges: self.snapshot_gauges(filter),
        }
    }

    /// Returns the message bookkeeping.
    pub fn message_stats(&self) -> MessageStats {
        self.stats
    }

    /// Drains the key-frequency counter.
    pub fn take_key_frequencies(&mut self) -> IndexMap<String, u64> {
        std::mem::take(&mut self.key_frequency)
    }

    /// Merges persisted metrics into the store.
    ///
    /// Counters are added, timer samples appended and gauges overwritten.
    pub fn restore(&mut self, metrics: CurrentMetrics) {
        for (key, value) in metrics.counters {
            *self.counters.entry(key).or_default() += value;
        }
        for (key, values) in metrics.timers {
            self.timers.entry(key).or_default().extend(values);
        }
        for (key, value) in metrics.gauges {
            self.gauges.insert(key, value);
        }
    }

    pub(crate) fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    pub(crate) fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    pub(crate) fn gauges(&self) -> &Gauges {
        &self.gauges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MetricStore {
        MetricStore::new(UnixTimestamp::from_secs(4711))
    }

    #[test]
    fn test_counter_sample_rate() {
        let mut store = store();
        for _ in 0..10 {
            store.apply_counter("a", 1.0, 0.5);
        }
        assert_eq!(store.snapshot_counters("")["a"], 20.0);
    }

    #[test]
    fn test_insertion_order() {
        let mut store = store();
        store.apply_counter("zeta", 1.0, 1.0);
        store.apply_counter("alpha", 1.0, 1.0);
        store.apply_counter("zeta", 1.0, 1.0);

        let keys: Vec<_> = store.snapshot_counters("").into_keys().collect();
        assert_eq!(keys, ["zeta", "alpha"]);
    }

    #[test]
    fn test_snapshot_filter() {
        let mut store = store();
        store.apply_timer("api.latency", 3.0);
        store.apply_timer("db.latency", 4.0);
        store.apply_gauge("api.queue", 2.0);

        let current = store.snapshot_current("api");
        assert_eq!(current.timers.len(), 1);
        assert_eq!(current.timers["api.latency"], [3.0]);
        assert_eq!(current.gauges.len(), 1);
        assert!(current.counters.is_empty());

        assert!(store.snapshot_current("nope").timers.is_empty());
    }

    #[test]
    fn test_apply_datagram() {
        let mut store = store();
        let received = UnixTimestamp::from_secs(5000);

        let bad = store.apply_datagram(&Datagram::parse(b"k:2|c:x:9|g"), true, received);
        assert_eq!(bad, 1);

        assert_eq!(store.snapshot_counters("")["k"], 2.0);
        assert_eq!(store.snapshot_gauges("")["k"], 9.0);
        assert_eq!(
            store.message_stats(),
            MessageStats {
                last_msg_seen: received,
                bad_lines_seen: 1,
            }
        );
        assert_eq!(store.take_key_frequencies()["k"], 1);
        assert!(store.take_key_frequencies().is_empty());
    }

    #[test]
    fn test_bad_line_creates_no_entries() {
        let mut store = store();
        store.apply_datagram(&Datagram::parse(b"ghost:oops"), false, UnixTimestamp::now());

        assert!(store.snapshot_current("").counters.is_empty());
        assert!(store.snapshot_current("").timers.is_empty());
        assert!(store.snapshot_current("").gauges.is_empty());
        assert_eq!(store.message_stats().bad_lines_seen, 1);
        assert!(store.take_key_frequencies().is_empty());
    }

    #[test]
    fn test_restore_merges() {
        let mut store = store();
        store.apply_counter("c", 1.0, 1.0);
        store.apply_timer("t", 1.0);
        store.apply_gauge("g", 1.0);

        let mut persisted = CurrentMetrics::default();
        persisted.counters.insert("c".to_owned(), 4.0);
        persisted.timers.insert("t".to_owned(), vec![2.0, 3.0]);
        persisted.gauges.insert("g".to_owned(), 5.0);
        store.restore(persisted);

        let current = store.snapshot_current("");
        assert_eq!(current.counters["c"], 5.0);
        assert_eq!(current.timers["t"], [1.0, 2.0, 3.0]);
        assert_eq!(current.gauges["g"], 5.0);
    }
}
