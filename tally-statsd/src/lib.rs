//! A high-level StatsD metric client built on cadence.
//!
//! Tally reports metrics about itself (datagrams received, flush durations, sink failures) to a
//! separate statsd server. This is unrelated to the metrics Tally aggregates for its clients.
//!
//! ## Defining Metrics
//!
//! In order to use metrics, one needs to first define one of the metric traits on a custom enum.
//! The following types of metrics are available: `counter`, `timer` and `gauge`. The traits only
//! provide a type safe metric name, so that a counter metric cannot be used as a timer metric.
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a statsd client. In that case, invoking
//! [`with_client`] or the [`metric!`] macro will become a noop. Only when configured, metrics will
//! actually be collected.
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! # use tally_statsd::MetricsClientConfig;
//! tally_statsd::init(MetricsClientConfig {
//!     prefix: "tally",
//!     host: "localhost:8126",
//!     default_tags: BTreeMap::new(),
//! })
//! .ok();
//! ```
//!
//! ## Macro Usage
//!
//! ```
//! use tally_statsd::{metric, CounterMetric};
//!
//! struct MyCounter;
//!
//! impl CounterMetric for MyCounter {
//!     fn name(&self) -> &'static str {
//!         "counter"
//!     }
//! }
//!
//! metric!(counter(MyCounter) += 1);
//! ```
use std::collections::BTreeMap;
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{BufferedUdpMetricSink, Metric, MetricBuilder, QueuingMetricSink, StatsdClient};
use parking_lot::RwLock;

/// Client configuration object to store globally.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
    /// Default tags to apply to every metric.
    pub default_tags: BTreeMap<String, String>,
}

/// Client configuration used for initialization of [`MetricsClient`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prefix which is prepended to all metric names.
    pub prefix: &'a str,
    /// Host of the metrics upstream.
    pub host: A,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Send a metric with the default tags defined on this `MetricsClient`.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        if let Err(error) = metric.try_send() {
            tally_log::error!("error sending a metric: {}", tally_log::LogError(&error));
        }
    }
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<Arc<MetricsClient>>> =
        METRICS_CLIENT.read().clone().into();
}

/// Internal prelude for the macro
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// The metrics prelude that is necessary to use the client.
pub mod prelude {
    pub use cadence::prelude::*;
}

/// Set a new statsd client.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Set a test client for the period of the called function (only affects the current thread).
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
        default_tags: Default::default(),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    rx.try_iter()
        .map(|x| String::from_utf8_lossy(&x).into_owned())
        .collect()
}

/// Disable the client again.
pub fn disable() {
    *METRICS_CLIENT.write() = None;
}

/// Tell the metrics system to report to statsd.
///
/// Fails if the host cannot be resolved or the local socket cannot be opened.
pub fn init<A: ToSocketAddrs>(config: MetricsClientConfig<A>) -> io::Result<()> {
    let addr = config
        .host
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no statsd address resolved"))?;

    tally_log::info!("reporting metrics to statsd at {addr}");

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;
    let udp_sink = BufferedUdpMetricSink::from(addr, socket).map_err(io::Error::other)?;
    let queuing_sink = QueuingMetricSink::from(udp_sink);

    set_client(MetricsClient {
        statsd_client: StatsdClient::from_sink(config.prefix, queuing_sink),
        default_tags: config.default_tags,
    });

    Ok(())
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked. For the most part the [`metric!`]
/// macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A metric for capturing timings.
///
/// Timings are a positive number of milliseconds between a start and end time.
///
/// ## Example
///
/// ```
/// use tally_statsd::{metric, TimerMetric};
///
/// struct FlushDuration;
///
/// impl TimerMetric for FlushDuration {
///     fn name(&self) -> &'static str {
///         "flush.duration"
///     }
/// }
///
/// // measure a block of code
/// let report = metric!(timer(FlushDuration), {
///     String::from("stats_counts.foo 1 1700000000")
/// });
/// ```
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client. The rates at which these
/// events occur or average values will be determined by the server receiving them.
///
/// ## Example
///
/// ```
/// use tally_statsd::{metric, CounterMetric};
///
/// enum DatagramCounter {
///     Received,
///     BadLines,
/// }
///
/// impl CounterMetric for DatagramCounter {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::Received => "datagrams.received",
///             Self::BadLines => "datagrams.bad_lines",
///         }
///     }
/// }
///
/// metric!(counter(DatagramCounter::Received) += 1);
/// metric!(counter(DatagramCounter::BadLines) += 2, kind = "missing_type");
/// ```
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// Gauge values are an instantaneous measurement of a value determined by the client. They do not
/// change unless changed by the client.
///
/// ## Example
///
/// ```
/// use tally_statsd::{metric, GaugeMetric};
///
/// struct HistoryLength;
///
/// impl GaugeMetric for HistoryLength {
///     fn name(&self) -> &'static str {
///         "history.length"
///     }
/// }
///
/// metric!(gauge(HistoryLength) = 360);
/// ```
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timer value
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.time_with_tags(&$crate::TimerMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timed block
    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::metric!(timer($id) = now.elapsed() $(, $($k).* = $v)*);
        rv
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cadence::{NopMetricSink, StatsdClient};

    use crate::{
        CounterMetric, GaugeMetric, MetricsClient, MetricsClientConfig, TimerMetric, set_client,
        with_capturing_test_client, with_client,
    };

    enum TestGauges {
        Foo,
        Bar,
    }

    impl GaugeMetric for TestGauges {
        fn name(&self) -> &'static str {
            match self {
                Self::Foo => "foo",
                Self::Bar => "bar",
            }
        }
    }

    struct TestCounter;

    impl CounterMetric for TestCounter {
        fn name(&self) -> &'static str {
            "counter"
        }
    }

    struct TestTimer;

    impl TimerMetric for TestTimer {
        fn name(&self) -> &'static str {
            "timer"
        }
    }

    #[test]
    fn test_capturing_client() {
        let captures = with_capturing_test_client(|| {
            metric!(gauge(TestGauges::Foo) = 123, sink = "graphite");
            metric!(gauge(TestGauges::Bar) = 456);
        });

        assert_eq!(captures, ["foo:123|g|#sink:graphite", "bar:456|g"]);
    }

    #[test]
    fn current_client_is_global_client() {
        let client1 = with_client(|c| format!("{c:?}"));
        set_client(MetricsClient {
            statsd_client: StatsdClient::from_sink("", NopMetricSink),
            default_tags: Default::default(),
        });
        let client2 = with_client(|c| format!("{c:?}"));

        assert_ne!(client1, client2);
        super::disable();
    }

    #[test]
    fn test_init_udp_client() {
        let listener = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();

        super::init(MetricsClientConfig {
            prefix: "tally",
            host: listener.local_addr().unwrap(),
            default_tags: Default::default(),
        })
        .unwrap();

        let client = with_client(|c| format!("{c:?}"));
        assert!(client.contains("tally"));
        super::disable();
    }

    #[test]
    fn test_zero_counter_is_skipped() {
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounter) += 0);
            metric!(counter(TestCounter) += 3, result = "ok");
        });
        assert_eq!(captures, ["counter:3|c|#result:ok"]);
    }

    #[test]
    fn test_timer_in_millis() {
        let captures = with_capturing_test_client(|| {
            metric!(timer(TestTimer) = Duration::from_millis(250));
        });
        assert_eq!(captures, ["timer:250|ms"]);
    }

    #[test]
    fn test_timed_block_returns_value() {
        let mut value = 0;
        let captures = with_capturing_test_client(|| {
            value = metric!(timer(TestTimer), { 42 });
        });
        assert_eq!(value, 42);
        assert!(captures[0].starts_with("timer:"));
        assert!(captures[0].ends_with("|ms"));
    }
}
