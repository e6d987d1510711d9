use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tally_common::UnixTimestamp;
use tally_system::{
    AsyncResponse, Controller, FromMessage, Interface, NoResponse, Receiver, Recipient, Sender,
    Service,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::aggregator::{self, AggregatorConfig};
use crate::history::HistoryResponse;
use crate::keyflush::{self, KeyFlushConfig};
use crate::protocol::Datagram;
use crate::snapshot::{Snapshot, SnapshotConfig};
use crate::statsd::{MetricCounters, MetricGauges, MetricTimers};
use crate::store::{Counters, CurrentMetrics, Gauges, MessageStats, Timers};

/// Parameters used by the [`AggregatorService`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorServiceConfig {
    /// Length of a flush window in milliseconds.
    ///
    /// Defaults to `10000`. Counter rates are computed relative to this interval.
    pub flush_interval: u64,

    /// Percentile thresholds computed for every timer.
    ///
    /// Defaults to `[90]`. A single number is accepted in place of a list.
    #[serde(deserialize_with = "deserialize_thresholds")]
    pub percent_threshold: Vec<f64>,

    /// Number of past flushes retained for history queries.
    ///
    /// Defaults to `360`, which is one hour at the default flush interval.
    pub history_len: usize,

    /// Enables the periodic debug dump and verbose sink errors at startup.
    ///
    /// The dump can be toggled at runtime with `SIGUSR1`.
    pub debug: bool,

    /// Interval of the debug dump in milliseconds.
    pub debug_interval: u64,

    /// Key-flush sampling. Disabled by default.
    pub key_flush: KeyFlushConfig,

    /// Periodic snapshot of the live metrics. Disabled by default.
    pub snapshot: SnapshotConfig,
}

impl Default for AggregatorServiceConfig {
    fn default() -> Self {
        Self {
            flush_interval: 10_000,
            percent_threshold: vec![90.0],
            history_len: 360,
            debug: false,
            debug_interval: 10_000,
            key_flush: KeyFlushConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl From<&AggregatorServiceConfig> for AggregatorConfig {
    fn from(value: &AggregatorServiceConfig) -> Self {
        Self {
            flush_interval: value.flush_interval,
            percent_threshold: value.percent_threshold.clone(),
            history_len: value.history_len,
            track_keys: value.key_flush.interval().is_some(),
        }
    }
}

fn deserialize_thresholds<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(f64),
        Many(Vec<f64>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(pct) => vec![pct],
        OneOrMany::Many(pcts) => pcts,
    })
}

/// Applies a parsed datagram to the live metrics.
#[derive(Debug)]
pub struct MergeDatagram {
    datagram: Datagram,
    received: UnixTimestamp,
}

impl MergeDatagram {
    /// Creates a message for a datagram received now.
    pub fn new(datagram: Datagram) -> Self {
        Self {
            datagram,
            received: UnixTimestamp::now(),
        }
    }

    /// Parses a raw payload received now.
    pub fn parse(payload: &[u8]) -> Self {
        Self::new(Datagram::parse(payload))
    }
}

/// Switches the periodic debug dump on or off.
#[derive(Debug)]
pub struct ToggleDebug;

/// Returns live counters whose key contains `filter`.
#[derive(Debug, Default)]
pub struct GetCounters {
    /// Key substring. Empty matches all keys.
    pub filter: String,
}

/// Returns live timer samples whose key contains `filter`.
#[derive(Debug, Default)]
pub struct GetTimers {
    /// Key substring. Empty matches all keys.
    pub filter: String,
}

/// Returns live gauges whose key contains `filter`.
#[derive(Debug, Default)]
pub struct GetGauges {
    /// Key substring. Empty matches all keys.
    pub filter: String,
}

/// Returns all live metrics whose key contains `filter`.
#[derive(Debug, Default)]
pub struct GetCurrent {
    /// Key substring. Empty matches all keys.
    pub filter: String,
}

/// Queries the flush history.
#[derive(Debug, Default)]
pub struct GetHistory {
    /// Key substring. Empty matches all keys.
    pub filter: String,
    /// Maximum number of most recent entries. `0` returns all retained entries.
    pub limit: usize,
}

/// Returns the text of the most recent flush report.
#[derive(Debug)]
pub struct GetLastReport;

/// Returns bookkeeping about received datagrams.
#[derive(Debug)]
pub struct GetMessageStats;

/// A rendered flush report to push to the downstream sink.
#[derive(Clone, Debug)]
pub struct ForwardReport {
    /// The Graphite plaintext report.
    pub text: String,
    /// Whether push failures should be logged as errors.
    pub verbose: bool,
}

/// Aggregator for statsd metrics.
///
/// Datagrams are merged into the live metrics as they arrive. Every flush interval, the
/// aggregator renders a report, retains its summary in history and forwards the text to the
/// receiver of [`ForwardReport`]. See [`AggregatorServiceConfig`] for configuration options.
#[derive(Debug)]
pub enum Aggregator {
    /// Merge a datagram.
    MergeDatagram(MergeDatagram),
    /// Toggle the debug dump.
    ToggleDebug(ToggleDebug),
    /// Read live counters.
    GetCounters(GetCounters, Sender<Counters>),
    /// Read live timers.
    GetTimers(GetTimers, Sender<Timers>),
    /// Read live gauges.
    GetGauges(GetGauges, Sender<Gauges>),
    /// Read all live metrics.
    GetCurrent(GetCurrent, Sender<CurrentMetrics>),
    /// Query the history.
    GetHistory(GetHistory, Sender<HistoryResponse>),
    /// Read the last report.
    GetLastReport(GetLastReport, Sender<String>),
    /// Read message bookkeeping.
    GetMessageStats(GetMessageStats, Sender<MessageStats>),
}

impl Aggregator {
    /// Returns the name of the message variant.
    fn variant(&self) -> &'static str {
        match self {
            Aggregator::MergeDatagram(_) => "MergeDatagram",
            Aggregator::ToggleDebug(_) => "ToggleDebug",
            Aggregator::GetCounters(_, _) => "GetCounters",
            Aggregator::GetTimers(_, _) => "GetTimers",
            Aggregator::GetGauges(_, _) => "GetGauges",
            Aggregator::GetCurrent(_, _) => "GetCurrent",
            Aggregator::GetHistory(_, _) => "GetHistory",
            Aggregator::GetLastReport(_, _) => "GetLastReport",
            Aggregator::GetMessageStats(_, _) => "GetMessageStats",
        }
    }
}

impl Interface for Aggregator {}

impl FromMessage<MergeDatagram> for Aggregator {
    type Response = NoResponse;
    fn from_message(message: MergeDatagram, _: ()) -> Self {
        Self::MergeDatagram(message)
    }
}

impl FromMessage<ToggleDebug> for Aggregator {
    type Response = NoResponse;
    fn from_message(message: ToggleDebug, _: ()) -> Self {
        Self::ToggleDebug(message)
    }
}

impl FromMessage<GetCounters> for Aggregator {
    type Response = AsyncResponse<Counters>;
    fn from_message(message: GetCounters, sender: Sender<Counters>) -> Self {
        Self::GetCounters(message, sender)
    }
}

impl FromMessage<GetTimers> for Aggregator {
    type Response = AsyncResponse<Timers>;
    fn from_message(message: GetTimers, sender: Sender<Timers>) -> Self {
        Self::GetTimers(message, sender)
    }
}

impl FromMessage<GetGauges> for Aggregator {
    type Response = AsyncResponse<Gauges>;
    fn from_message(message: GetGauges, sender: Sender<Gauges>) -> Self {
        Self::GetGauges(message, sender)
    }
}

impl FromMessage<GetCurrent> for Aggregator {
    type Response = AsyncResponse<CurrentMetrics>;
    fn from_message(message: GetCurrent, sender: Sender<CurrentMetrics>) -> Self {
        Self::GetCurrent(message, sender)
    }
}

impl FromMessage<GetHistory> for Aggregator {
    type Response = AsyncResponse<HistoryResponse>;
    fn from_message(message: GetHistory, sender: Sender<HistoryResponse>) -> Self {
        Self::GetHistory(message, sender)
    }
}

impl FromMessage<GetLastReport> for Aggregator {
    type Response = AsyncResponse<String>;
    fn from_message(message: GetLastReport, sender: Sender<String>) -> Self {
        Self::GetLastReport(message, sender)
    }
}

impl FromMessage<GetMessageStats> for Aggregator {
    type Response = AsyncResponse<MessageStats>;
    fn from_message(message: GetMessageStats, sender: Sender<MessageStats>) -> Self {
        Self::GetMessageStats(message, sender)
    }
}

/// Creates a ticker whose first tick fires one `period` from now.
fn ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Waits for the next tick of an optional ticker. Never resolves for `None`.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Service implementing the [`Aggregator`] interface.
pub struct AggregatorService {
    aggregator: aggregator::Aggregator,
    config: AggregatorServiceConfig,
    receiver: Option<Recipient<ForwardReport, NoResponse>>,
    debug: bool,
}

impl AggregatorService {
    /// Creates a new aggregator service and connects it to `receiver`.
    ///
    /// If a snapshot is configured and exists, its metrics are restored into the live store. A
    /// snapshot that cannot be read is logged and skipped.
    pub fn new(
        config: AggregatorServiceConfig,
        receiver: Option<Recipient<ForwardReport, NoResponse>>,
        startup_time: UnixTimestamp,
    ) -> Self {
        let mut aggregator =
            aggregator::Aggregator::new(AggregatorConfig::from(&config), startup_time);

        if let Some(path) = &config.snapshot.path {
            match Snapshot::load(path) {
                Ok(Some(snapshot)) => {
                    tally_log::info!(
                        "restoring metrics snapshot written by worker started at {}",
                        snapshot.startup_time
                    );
                    aggregator.restore(snapshot);
                }
                Ok(None) => tally_log::debug!("no metrics snapshot at {}", path.display()),
                Err(error) => tally_log::error!(
                    "failed to restore metrics snapshot: {}",
                    tally_log::LogError(&error)
                ),
            }
        }

        Self {
            aggregator,
            debug: config.debug,
            config,
            receiver,
        }
    }

    fn handle_merge_datagram(&mut self, message: MergeDatagram) {
        let MergeDatagram { datagram, received } = message;

        for error in &datagram.errors {
            tally_log::warn!(key = %datagram.key, "{error}");
        }

        let bad_lines = self.aggregator.merge_datagram(&datagram, received);
        tally_statsd::metric!(counter(MetricCounters::DatagramsMerged) += 1);
        tally_statsd::metric!(counter(MetricCounters::BadLines) += bad_lines as i64);
    }

    fn handle_toggle_debug(&mut self) {
        self.debug = !self.debug;
        tally_log::info!(
            "debug dump {}",
            if self.debug { "enabled" } else { "disabled" }
        );
    }

    fn handle_message(&mut self, message: Aggregator) {
        let ty = message.variant();
        tally_statsd::metric!(
            timer(MetricTimers::AggregatorServiceDuration),
            message = ty,
            {
                match message {
                    Aggregator::MergeDatagram(msg) => self.handle_merge_datagram(msg),
                    Aggregator::ToggleDebug(_) => self.handle_toggle_debug(),
                    Aggregator::GetCounters(msg, sender) => {
                        sender.send(self.aggregator.store().snapshot_counters(&msg.filter))
                    }
                    Aggregator::GetTimers(msg, sender) => {
                        sender.send(self.aggregator.store().snapshot_timers(&msg.filter))
                    }
                    Aggregator::GetGauges(msg, sender) => {
                        sender.send(self.aggregator.store().snapshot_gauges(&msg.filter))
                    }
                    Aggregator::GetCurrent(msg, sender) => {
                        sender.send(self.aggregator.current(&msg.filter))
                    }
                    Aggregator::GetHistory(msg, sender) => {
                        sender.send(self.aggregator.history(&msg.filter, msg.limit))
                    }
                    Aggregator::GetLastReport(_, sender) => {
                        sender.send(self.aggregator.last_report().to_owned())
                    }
                    Aggregator::GetMessageStats(_, sender) => {
                        sender.send(self.aggregator.store().message_stats())
                    }
                }
            }
        )
    }

    fn flush(&mut self) {
        let stats = tally_statsd::metric!(timer(MetricTimers::FlushDuration), {
            self.aggregator.flush(tally_common::now_millis())
        });

        tally_log::trace!("flushed {} series", stats.num_stats);
        tally_statsd::metric!(counter(MetricCounters::FlushedLines) += stats.lines as i64);
        tally_statsd::metric!(gauge(MetricGauges::NumStats) = stats.num_stats as u64);
        tally_statsd::metric!(
            gauge(MetricGauges::HistoryLength) = self.aggregator.history_len() as u64
        );

        if let Some(ref receiver) = self.receiver {
            receiver.send(ForwardReport {
                text: self.aggregator.last_report().to_owned(),
                verbose: self.debug,
            });
        }

        // Persisted counters must not include values that were already reported.
        self.save_snapshot();
    }

    fn flush_keys(&mut self) {
        let ranked = self.aggregator.take_top_keys(self.config.key_flush.percent);
        if ranked.is_empty() {
            return;
        }

        let text = keyflush::render_key_report(&ranked, chrono::Utc::now());
        let target = self.config.key_flush.target();
        let count = ranked.len() as i64;

        tokio::spawn(async move {
            let result = match target.write(&text).await {
                Ok(()) => "ok",
                Err(error) => {
                    tally_log::error!(
                        "failed to write key-flush report: {}",
                        tally_log::LogError(&error)
                    );
                    "failed"
                }
            };
            tally_statsd::metric!(
                counter(MetricCounters::KeyFlushWritten) += count,
                result = result,
            );
        });
    }

    /// Returns the live metrics to dump, or `None` while the debug dump is off.
    fn debug_dump(&self) -> Option<CurrentMetrics> {
        self.debug.then(|| self.aggregator.current(""))
    }

    fn dump_debug(&self) {
        let Some(current) = self.debug_dump() else {
            return;
        };

        tally_log::debug!(counters = ?current.counters, "debug dump");
        tally_log::debug!(timers = ?current.timers, "debug dump");
        tally_log::debug!(gauges = ?current.gauges, "debug dump");
    }

    fn save_snapshot(&self) {
        let Some(path) = &self.config.snapshot.path else {
            return;
        };

        match self.aggregator.snapshot().save(path) {
            Ok(()) => tally_log::trace!("saved metrics snapshot to {}", path.display()),
            Err(error) => tally_log::error!(
                "failed to save metrics snapshot: {}",
                tally_log::LogError(&error)
            ),
        }
    }
}

impl Service for AggregatorService {
    type Interface = Aggregator;

    fn spawn_handler(mut self, mut rx: Receiver<Self::Interface>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut flush_ticker = ticker(Duration::from_millis(self.config.flush_interval));
            let mut debug_ticker = ticker(Duration::from_millis(self.config.debug_interval));
            let mut key_flush_ticker = self.config.key_flush.interval().map(ticker);
            let mut snapshot_ticker = self.config.snapshot.interval().map(ticker);
            let mut shutdown = Controller::shutdown_handle();

            tally_log::info!("aggregator started");

            loop {
                tokio::select! {
                    biased;

                    _ = flush_ticker.tick() => self.flush(),
                    _ = next_tick(&mut key_flush_ticker) => self.flush_keys(),
                    _ = debug_ticker.tick() => self.dump_debug(),
                    _ = next_tick(&mut snapshot_ticker) => self.save_snapshot(),
                    message = rx.recv() => match message {
                        Some(message) => self.handle_message(message),
                        None => break,
                    },
                    _ = shutdown.notified() => break,
                }
            }

            self.save_snapshot();
            tally_log::info!("aggregator stopped");
        })
    }
}
