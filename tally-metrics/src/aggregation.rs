//! Flush math and report rendering.
//!
//! A flush turns the live [`MetricStore`] into a Graphite plaintext report and a
//! [`HistoryEntry`], then resets the window: counters go back to `0`, timer samples are cleared
//! and gauges stay untouched.

use std::fmt::{self, Write};

use tally_common::UnixTimestamp;

use crate::history::{
    CounterValue, HistoryEntry, KeyedValue, PercentileValue, TimerPercentile, TimerValue,
};
use crate::protocol::TimerType;
use crate::store::MetricStore;

/// Returns the per-second rate of a counter total over a flush interval in milliseconds.
pub fn counter_rate(total: f64, flush_interval_ms: u64) -> f64 {
    total / (flush_interval_ms as f64 / 1000.0)
}

/// Renders a percentile threshold for use in a metric path.
///
/// ```
/// assert_eq!(tally_metrics::pct_label(90.0), "90");
/// assert_eq!(tally_metrics::pct_label(99.9), "99_9");
/// ```
pub fn pct_label(pct: f64) -> String {
    pct.to_string().replace('.', "_")
}

/// Mean and upper bound for one percentile threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PercentileSummary {
    /// The threshold in `(0, 100]`.
    pub pct: f64,
    /// Mean of the samples within the threshold.
    pub mean: f64,
    /// Largest sample within the threshold.
    pub upper: f64,
}

/// Statistics over the samples of one timer.
#[derive(Clone, Debug, PartialEq)]
pub struct TimerSummary {
    /// Largest sample.
    pub upper: f64,
    /// Smallest sample.
    pub lower: f64,
    /// Number of samples.
    pub count: usize,
    /// One summary per threshold, in configuration order.
    pub percentiles: Vec<PercentileSummary>,
}

/// Sorts the samples and summarizes them for every threshold.
///
/// For more than one sample, the lowest `count - round(((100 - pct) / 100) * count)` samples are
/// within the threshold, rounding halves up. At least one sample is always kept. A single sample
/// is its own mean and upper bound. Returns `None` without samples.
pub fn summarize_timer(values: &mut [TimerType], thresholds: &[f64]) -> Option<TimerSummary> {
    values.sort_by(f64::total_cmp);

    let count = values.len();
    let lower = *values.first()?;
    let upper = *values.last()?;

    let percentiles = thresholds
        .iter()
        .map(|&pct| {
            if count == 1 {
                return PercentileSummary {
                    pct,
                    mean: lower,
                    upper,
                };
            }

            let threshold_index = (((100.0 - pct) / 100.0) * count as f64 + 0.5).floor();
            let num_in_threshold =
                (count as f64 - threshold_index).clamp(1.0, count as f64) as usize;
            let within = &values[..num_in_threshold];

            PercentileSummary {
                pct,
                mean: within.iter().sum::<f64>() / num_in_threshold as f64,
                upper: within[num_in_threshold - 1],
            }
        })
        .collect();

    Some(TimerSummary {
        upper,
        lower,
        count,
        percentiles,
    })
}

/// Writes Graphite plaintext lines with a shared timestamp.
struct ReportWriter {
    text: String,
    ts: UnixTimestamp,
    lines: usize,
}

impl ReportWriter {
    fn new(ts: UnixTimestamp) -> Self {
        Self {
            text: String::new(),
            ts,
            lines: 0,
        }
    }

    fn line(&mut self, path: fmt::Arguments<'_>, value: impl fmt::Display) {
        // Writing into a `String` does not fail.
        writeln!(self.text, "{path} {value} {}", self.ts).ok();
        self.lines += 1;
    }
}

/// Output of a single flush.
#[derive(Clone, Debug, PartialEq)]
pub struct FlushReport {
    /// The Graphite plaintext report.
    pub text: String,
    /// The summary to retain in history.
    pub entry: HistoryEntry,
    /// Number of lines in the report.
    pub lines: usize,
}

/// Flushes the store at `now_ms` and resets the window.
///
/// Report lines carry the timestamp in seconds, the history entry keeps milliseconds.
pub fn flush_store(
    store: &mut MetricStore,
    flush_interval_ms: u64,
    thresholds: &[f64],
    now_ms: u64,
) -> FlushReport {
    let mut report = ReportWriter::new(UnixTimestamp::from_millis(now_ms));
    let mut num_stats = 0;

    let mut counters = Vec::new();
    for (key, total) in store.counters_mut() {
        let value = *total;
        let value_per_second = counter_rate(value, flush_interval_ms);

        report.line(format_args!("stats.{key}"), value_per_second);
        report.line(format_args!("stats_counts.{key}"), value);

        counters.push(KeyedValue {
            key: key.clone(),
            value: CounterValue {
                value,
                value_per_second,
            },
        });

        *total = 0.0;
        num_stats += 1;
    }

    let mut timers = Vec::new();
    for (key, values) in store.timers_mut() {
        let Some(summary) = summarize_timer(values, thresholds) else {
            continue;
        };

        let mut pcts = Vec::with_capacity(summary.percentiles.len());
        for percentile in &summary.percentiles {
            let label = pct_label(percentile.pct);
            report.line(
                format_args!("stats.timers.{key}.mean_{label}"),
                percentile.mean,
            );
            report.line(
                format_args!("stats.timers.{key}.upper_{label}"),
                percentile.upper,
            );
            pcts.push(TimerPercentile {
                pct: label,
                value: PercentileValue {
                    mean: percentile.mean,
                    upper: percentile.upper,
                },
            });
        }

        report.line(format_args!("stats.timers.{key}.upper"), summary.upper);
        report.line(format_args!("stats.timers.{key}.lower"), summary.lower);
        report.line(format_args!("stats.timers.{key}.count"), summary.count);

        timers.push(KeyedValue {
            key: key.clone(),
            value: TimerValue {
                upper: summary.upper,
                lower: summary.lower,
                count: summary.count,
                pcts,
            },
        });

        values.clear();
        num_stats += 1;
    }

    let mut gauges = Vec::new();
    for (key, &value) in store.gauges() {
        report.line(format_args!("stats.gauges.{key}"), value);
        gauges.push(KeyedValue {
            key: key.clone(),
            value,
        });
        num_stats += 1;
    }

    report.line(format_args!("statsd.numStats"), num_stats);

    FlushReport {
        text: report.text,
        lines: report.lines,
        entry: HistoryEntry {
            ts: now_ms,
            num_stats,
            counters,
            timers,
            gauges,
        },
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const NOW_MS: u64 = 1_700_000_000_123;

    fn store() -> MetricStore {
        MetricStore::new(UnixTimestamp::from_secs(1_700_000_000))
    }

    #[test]
    fn test_counter_rate() {
        assert_eq!(counter_rate(20.0, 10_000), 2.0);
        assert_eq!(counter_rate(5.0, 2_000), 2.5);
    }

    #[test]
    fn test_pct_label() {
        assert_eq!(pct_label(50.0), "50");
        assert_eq!(pct_label(99.99), "99_99");
    }

    #[test]
    fn test_summarize_timer_one_to_ten() {
        let mut values: Vec<f64> = (1..=10).rev().map(f64::from).collect();
        let summary = summarize_timer(&mut values, &[90.0]).unwrap();

        assert_eq!(summary.upper, 10.0);
        assert_eq!(summary.lower, 1.0);
        assert_eq!(summary.count, 10);
        assert_eq!(
            summary.percentiles,
            [PercentileSummary {
                pct: 90.0,
                mean: 5.0,
                upper: 9.0,
            }]
        );
    }

    #[test]
    fn test_summarize_timer_rounds_half_up() {
        // 25% of 2 samples is exactly half a sample, which rounds up to one sample outside.
        let mut values = vec![4.0, 2.0];
        let summary = summarize_timer(&mut values, &[75.0]).unwrap();
        assert_eq!(summary.percentiles[0].upper, 2.0);
        assert_eq!(summary.percentiles[0].mean, 2.0);
    }

    #[test]
    fn test_summarize_timer_single_sample() {
        let mut values = vec![42.0];
        let summary = summarize_timer(&mut values, &[50.0, 90.0]).unwrap();
        for percentile in summary.percentiles {
            assert_eq!(percentile.mean, 42.0);
            assert_eq!(percentile.upper, 42.0);
        }
    }

    #[test]
    fn test_summarize_timer_keeps_one_sample() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        let summary = summarize_timer(&mut values, &[1.0]).unwrap();
        assert_eq!(summary.percentiles[0].upper, 1.0);
        assert_eq!(summary.percentiles[0].mean, 1.0);
    }

    #[test]
    fn test_summarize_timer_empty() {
        assert_eq!(summarize_timer(&mut [], &[90.0]), None);
    }

    #[test]
    fn test_flush_report() {
        let mut store = store();
        for _ in 0..10 {
            store.apply_counter("a", 1.0, 0.5);
        }
        for value in 1..=10 {
            store.apply_timer("t", f64::from(value));
        }
        store.apply_gauge("g", 7.0);

        let report = flush_store(&mut store, 10_000, &[90.0], NOW_MS);

        assert_eq!(
            report.text,
            "\
stats.a 2 1700000000
stats_counts.a 20 1700000000
stats.timers.t.mean_90 5 1700000000
stats.timers.t.upper_90 9 1700000000
stats.timers.t.upper 10 1700000000
stats.timers.t.lower 1 1700000000
stats.timers.t.count 10 1700000000
stats.gauges.g 7 1700000000
statsd.numStats 3 1700000000
"
        );
        assert_eq!(report.lines, 9);
        assert_eq!(report.entry.ts, NOW_MS);
        assert_eq!(report.entry.num_stats, 3);
    }

    #[test]
    fn test_flush_resets_window() {
        let mut store = store();
        store.apply_counter("c", 3.0, 1.0);
        store.apply_timer("t", 1.0);
        store.apply_gauge("g", 1.5);

        flush_store(&mut store, 10_000, &[90.0], NOW_MS);
        let current = store.snapshot_current("");
        assert_eq!(current.counters["c"], 0.0);
        assert!(current.timers["t"].is_empty());
        assert_eq!(current.gauges["g"], 1.5);

        // Zeroed counters are still reported, empty timers are skipped, gauges survive.
        let second = flush_store(&mut store, 10_000, &[90.0], NOW_MS + 10_000);
        assert_eq!(
            second.text,
            "\
stats.c 0 1700000010
stats_counts.c 0 1700000010
stats.gauges.g 1.5 1700000010
statsd.numStats 2 1700000010
"
        );
        assert!(second.entry.timers.is_empty());
    }

    #[test]
    fn test_gauge_last_write_wins_across_flush() {
        let mut store = store();
        store.apply_gauge("g", 5.0);
        store.apply_gauge("g", 7.0);
        assert_eq!(store.snapshot_gauges("")["g"], 7.0);

        let first = flush_store(&mut store, 10_000, &[90.0], NOW_MS);
        assert!(first.text.contains("stats.gauges.g 7 1700000000\n"));

        let second = flush_store(&mut store, 10_000, &[90.0], NOW_MS + 10_000);
        assert!(second.text.contains("stats.gauges.g 7 1700000010\n"));
        assert_eq!(second.entry.gauges[0].value, 7.0);
    }

    #[test]
    fn test_flush_multiple_thresholds() {
        let mut store = store();
        for value in 1..=100 {
            store.apply_timer("rt", f64::from(value));
        }

        let report = flush_store(&mut store, 10_000, &[50.0, 99.5], NOW_MS);
        let timer = &report.entry.timers[0].value;
        let labels: Vec<_> = timer.pcts.iter().map(|p| p.pct.as_str()).collect();
        assert_eq!(labels, ["50", "99_5"]);
        assert_eq!(timer.pcts[0].value.upper, 50.0);
        assert_eq!(timer.pcts[0].value.mean, 25.5);
        assert!(report.text.contains("stats.timers.rt.upper_99_5 99 1700000000\n"));
    }

    #[test]
    fn test_flush_empty_store() {
        let mut store = store();
        let report = flush_store(&mut store, 10_000, &[90.0], NOW_MS);
        assert_eq!(report.text, "statsd.numStats 0 1700000000\n");
        assert_eq!(report.entry.num_stats, 0);
    }
}
