use tally_statsd::{CounterMetric, TimerMetric};

/// Counter metrics used by the worker services.
pub enum ServerCounters {
    /// Number of datagrams received on the UDP listener.
    DatagramsReceived,

    /// Number of failed reads on the UDP listener.
    DatagramErrors,

    /// Number of report pushes to the downstream sink.
    ///
    /// This metric is tagged with:
    ///  - `result`: Either `ok` or `failed`.
    SinkPush,

    /// Number of times the HTTP server was started.
    ServerStarting,

    /// Number of requests rejected by the API key check.
    RequestsForbidden,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match *self {
            ServerCounters::DatagramsReceived => "udp.datagrams",
            ServerCounters::DatagramErrors => "udp.errors",
            ServerCounters::SinkPush => "sink.push",
            ServerCounters::ServerStarting => "server.starting",
            ServerCounters::RequestsForbidden => "requests.forbidden",
        }
    }
}

/// Timer metrics used by the worker services.
pub enum ServerTimers {
    /// Total time spent pushing a report to the downstream sink.
    SinkPushDuration,

    /// Total time spent handling an HTTP request.
    ///
    /// This metric is tagged with:
    ///  - `route`: The matched route, or `unknown`.
    ///  - `status_code`: The HTTP status code of the response.
    RequestDuration,
}

impl TimerMetric for ServerTimers {
    fn name(&self) -> &'static str {
        match *self {
            ServerTimers::SinkPushDuration => "sink.push.duration",
            ServerTimers::RequestDuration => "requests.duration",
        }
    }
}
