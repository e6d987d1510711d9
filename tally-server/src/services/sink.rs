//! Best-effort push of flush reports to a downstream Graphite sink.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tally_common::UnixTimestamp;
use tally_metrics::ForwardReport;
use tally_system::{AsyncResponse, FromMessage, Interface, NoResponse, Receiver, Sender, Service};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::statsd::{ServerCounters, ServerTimers};

/// Host and port of the downstream sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkAddr {
    /// Host name or IP address.
    pub host: String,
    /// Port of the plaintext listener.
    pub port: u16,
}

/// Outcome bookkeeping of report pushes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// When a report was last written successfully.
    pub last_flush: UnixTimestamp,
    /// When a push last failed.
    pub last_exception: UnixTimestamp,
}

/// Returns the current [`SinkStats`].
#[derive(Debug)]
pub struct GetSinkStats;

/// Service interface of the [`SinkService`].
#[derive(Debug)]
pub enum Sink {
    /// Push a report to the sink.
    Forward(ForwardReport),
    /// Read the push bookkeeping.
    GetStats(GetSinkStats, Sender<SinkStats>),
}

impl Interface for Sink {}

impl FromMessage<ForwardReport> for Sink {
    type Response = NoResponse;

    fn from_message(message: ForwardReport, _: ()) -> Self {
        Self::Forward(message)
    }
}

impl FromMessage<GetSinkStats> for Sink {
    type Response = AsyncResponse<SinkStats>;

    fn from_message(message: GetSinkStats, sender: Sender<SinkStats>) -> Self {
        Self::GetStats(message, sender)
    }
}

/// Connects, writes the full report and closes the connection.
async fn push(addr: &SinkAddr, text: &str) -> io::Result<()> {
    let mut stream = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
    stream.write_all(text.as_bytes()).await?;
    stream.shutdown().await
}

/// Forwards reports to the downstream sink.
///
/// Every report is pushed on its own task over a fresh connection, so a slow sink never delays
/// the aggregator. There are no retries. Without an address, reports are dropped.
#[derive(Debug)]
pub struct SinkService {
    addr: Option<Arc<SinkAddr>>,
    stats: Arc<Mutex<SinkStats>>,
}

impl SinkService {
    /// Creates a sink service. `startup_time` initializes the bookkeeping.
    pub fn new(addr: Option<SinkAddr>, startup_time: UnixTimestamp) -> Self {
        Self {
            addr: addr.map(Arc::new),
            stats: Arc::new(Mutex::new(SinkStats {
                last_flush: startup_time,
                last_exception: startup_time,
            })),
        }
    }

    fn handle_forward(&self, report: ForwardReport) {
        let Some(addr) = self.addr.clone() else {
            return;
        };

        let stats = self.stats.clone();
        tokio::spawn(async move {
            let result = tally_statsd::metric!(timer(ServerTimers::SinkPushDuration), {
                push(&addr, &report.text).await
            });

            let now = UnixTimestamp::now();
            match result {
                Ok(()) => {
                    stats.lock().last_flush = now;
                    tally_statsd::metric!(counter(ServerCounters::SinkPush) += 1, result = "ok");
                }
                Err(error) => {
                    stats.lock().last_exception = now;
                    tally_statsd::metric!(
                        counter(ServerCounters::SinkPush) += 1,
                        result = "failed"
                    );

                    if report.verbose {
                        tally_log::error!(
                            "failed to push report to {}:{}: {}",
                            addr.host,
                            addr.port,
                            tally_log::LogError(&error)
                        );
                    } else {
                        tally_log::trace!(
                            "failed to push report to {}:{}: {error}",
                            addr.host,
                            addr.port
                        );
                    }
                }
            }
        });
    }

    fn handle_message(&self, message: Sink) {
        match message {
            Sink::Forward(report) => self.handle_forward(report),
            Sink::GetStats(_, sender) => sender.send(*self.stats.lock()),
        }
    }
}

impl Service for SinkService {
    type Interface = Sink;

    fn spawn_handler(self, mut rx: Receiver<Self::Interface>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                self.handle_message(message);
            }
            tally_log::debug!("sink stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_push_writes_report() {
        tally_log::init_test!();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let addr = SinkAddr {
            host: "127.0.0.1".to_owned(),
            port,
        };
        let sink = SinkService::new(Some(addr), UnixTimestamp::from_secs(0)).start();

        sink.send(ForwardReport {
            text: "statsd.numStats 0 1700000000\n".to_owned(),
            verbose: true,
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = String::new();
        stream.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "statsd.numStats 0 1700000000\n");

        // The stats are updated after the connection is closed.
        let mut stats = sink.send(GetSinkStats).await.unwrap();
        for _ in 0..50 {
            if stats.last_flush > UnixTimestamp::from_secs(0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            stats = sink.send(GetSinkStats).await.unwrap();
        }
        assert!(stats.last_flush > UnixTimestamp::from_secs(0));
        assert_eq!(stats.last_exception, UnixTimestamp::from_secs(0));
    }

    #[tokio::test]
    async fn test_push_failure_recorded() {
        tally_log::init_test!();

        // Bind and drop a listener to obtain a port that refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let addr = SinkAddr {
            host: "127.0.0.1".to_owned(),
            port,
        };
        let sink = SinkService::new(Some(addr), UnixTimestamp::from_secs(0)).start();
        sink.send(ForwardReport {
            text: "x 1 1\n".to_owned(),
            verbose: false,
        });

        let mut stats = sink.send(GetSinkStats).await.unwrap();
        for _ in 0..50 {
            if stats.last_exception > UnixTimestamp::from_secs(0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            stats = sink.send(GetSinkStats).await.unwrap();
        }
        assert!(stats.last_exception > UnixTimestamp::from_secs(0));
        assert_eq!(stats.last_flush, UnixTimestamp::from_secs(0));
    }

    #[tokio::test]
    async fn test_no_addr_drops_reports() {
        tally_log::init_test!();

        let sink = SinkService::new(None, UnixTimestamp::from_secs(7)).start();
        sink.send(ForwardReport {
            text: "x 1 1\n".to_owned(),
            verbose: true,
        });

        let stats = sink.send(GetSinkStats).await.unwrap();
        assert_eq!(
            stats,
            SinkStats {
                last_flush: UnixTimestamp::from_secs(7),
                last_exception: UnixTimestamp::from_secs(7),
            }
        );
    }
}
