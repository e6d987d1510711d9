use std::io;
use std::net::SocketAddr;

use tally_config::Config;
use tally_metrics::{Aggregator, MergeDatagram};
use tally_system::{Addr, Controller, Service};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::services::server::ServerError;
use crate::statsd::ServerCounters;

/// Largest payload of a single UDP datagram.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Receives statsd datagrams and forwards them to the [`Aggregator`].
///
/// Each datagram is parsed on arrival. Read errors are logged and the listener keeps going. The
/// socket closes when a [`Shutdown`](tally_system::Shutdown) is triggered.
#[derive(Debug)]
pub struct UdpService {
    socket: std::net::UdpSocket,
    dump_messages: bool,
    aggregator: Addr<Aggregator>,
}

impl UdpService {
    /// Binds the UDP listener on the configured address.
    pub fn new(config: &Config, aggregator: Addr<Aggregator>) -> Result<Self, ServerError> {
        Self::bind(config.udp_addr(), config.dump_messages(), aggregator)
    }

    fn bind(
        addr: SocketAddr,
        dump_messages: bool,
        aggregator: Addr<Aggregator>,
    ) -> Result<Self, ServerError> {
        let socket = std::net::UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            dump_messages,
            aggregator,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

fn handle_datagram(
    aggregator: &Addr<Aggregator>,
    dump_messages: bool,
    payload: &[u8],
    peer: SocketAddr,
) {
    tally_statsd::metric!(counter(ServerCounters::DatagramsReceived) += 1);

    if dump_messages {
        tally_log::debug!(
            "datagram from {peer}: {}",
            String::from_utf8_lossy(payload)
        );
    }

    aggregator.send(MergeDatagram::parse(payload));
}

impl Service for UdpService {
    type Interface = ();

    fn spawn_handler(self, _rx: tally_system::Receiver<Self::Interface>) -> JoinHandle<()> {
        let Self {
            socket,
            dump_messages,
            aggregator,
        } = self;

        tokio::spawn(async move {
            let socket = match UdpSocket::from_std(socket) {
                Ok(socket) => socket,
                Err(error) => {
                    tally_log::error!(
                        "failed to register udp listener: {}",
                        tally_log::LogError(&error)
                    );
                    return;
                }
            };

            if let Ok(addr) = socket.local_addr() {
                tally_log::info!("udp listener bound to {addr}");
            }

            let mut shutdown = Controller::shutdown_handle();
            let mut buf = vec![0; MAX_DATAGRAM_SIZE];

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.notified() => break,
                    result = socket.recv_from(&mut buf) => match result {
                        Ok((len, peer)) => {
                            handle_datagram(&aggregator, dump_messages, &buf[..len], peer)
                        }
                        Err(error) => {
                            tally_statsd::metric!(counter(ServerCounters::DatagramErrors) += 1);
                            tally_log::error!(
                                "failed to read from udp socket: {}",
                                tally_log::LogError(&error)
                            );
                        }
                    },
                }
            }

            tally_log::info!("udp listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tally_metrics::GetCounters;

    use super::*;

    #[tokio::test]
    async fn test_datagrams_forwarded() {
        tally_log::init_test!();

        let (aggregator, mut rx) = Addr::custom();
        let service = UdpService::bind("127.0.0.1:0".parse().unwrap(), true, aggregator).unwrap();
        let addr = service.local_addr().unwrap();
        service.start();

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"a:1|c", addr).unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(message, Aggregator::MergeDatagram(_)));
    }

    #[tokio::test]
    async fn test_datagrams_merged() {
        tally_log::init_test!();

        let aggregator = tally_metrics::AggregatorService::new(
            Default::default(),
            None,
            tally_common::UnixTimestamp::now(),
        )
        .start();

        let service =
            UdpService::bind("127.0.0.1:0".parse().unwrap(), false, aggregator.clone()).unwrap();
        let addr = service.local_addr().unwrap();
        service.start();

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"hits:2|c", addr).unwrap();

        let mut counters = tally_metrics::Counters::default();
        for _ in 0..100 {
            counters = aggregator.send(GetCounters::default()).await.unwrap();
            if !counters.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counters.get("hits"), Some(&2.0));
    }

    #[test]
    fn test_bind_failure() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let (aggregator, _rx) = Addr::custom();
        let result = UdpService::bind(taken.local_addr().unwrap(), false, aggregator);
        assert!(matches!(result, Err(ServerError::BindFailed(_))));
    }
}
