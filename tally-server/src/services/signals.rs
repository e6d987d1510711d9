use tally_metrics::{Aggregator, ToggleDebug};
use tally_system::{Addr, Controller, Service};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;

/// Toggles the aggregator's debug dump on `SIGUSR1`.
#[derive(Debug)]
pub struct SignalService {
    aggregator: Addr<Aggregator>,
}

impl SignalService {
    /// Creates a signal service that notifies the given aggregator.
    pub fn new(aggregator: Addr<Aggregator>) -> Self {
        Self { aggregator }
    }
}

impl Service for SignalService {
    type Interface = ();

    fn spawn_handler(self, _rx: tally_system::Receiver<Self::Interface>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut usr1 = match signal(SignalKind::user_defined1()) {
                Ok(usr1) => usr1,
                Err(error) => {
                    tally_log::error!(
                        "failed to listen for SIGUSR1: {}",
                        tally_log::LogError(&error)
                    );
                    return;
                }
            };

            let mut shutdown = Controller::shutdown_handle();
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.notified() => break,
                    Some(()) = usr1.recv() => {
                        tally_log::info!("received SIGUSR1, toggling debug output");
                        self.aggregator.send(ToggleDebug);
                    }
                    else => break,
                }
            }
        })
    }
}
