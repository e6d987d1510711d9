use std::io;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::sync::watch;

/// Global broadcast of the process shutdown.
static SHUTDOWN: LazyLock<watch::Sender<Option<Shutdown>>> =
    LazyLock::new(|| watch::channel(None).0);

/// Shutdown request message sent by the [`Controller`] to subscribed services.
///
/// A handler has to ensure that it doesn't take longer than `timeout` to resolve the future.
/// Ideally, open work is persisted or finished in an orderly manner but no new requests are
/// accepted anymore.
///
/// After the timeout the worker will shut down regardless of what the receivers of this message
/// do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

/// Notifies a service about an upcoming shutdown.
///
/// Obtain a handle through [`Controller::shutdown_handle`] and await
/// [`notified`](Self::notified), typically as one branch of the service's `select!` loop.
#[derive(Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Waits for the next shutdown signal.
    ///
    /// Resolves once per shutdown. If the controller goes away, this resolves with an immediate
    /// shutdown.
    pub async fn notified(&mut self) -> Shutdown {
        while self.0.changed().await.is_ok() {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }
        }

        Shutdown { timeout: None }
    }
}

/// Service to start and gracefully stop the worker's services.
///
/// The controller listens for termination signals sent to the process and broadcasts a
/// [`Shutdown`] to every holder of a [`ShutdownHandle`]:
///
/// - `SIGINT` and `SIGQUIT` request an immediate shutdown.
/// - `SIGTERM` and `SIGHUP` request a graceful shutdown with the configured timeout.
///
/// ### Example
///
/// ```
/// use std::time::Duration;
/// use tally_system::{Controller, Shutdown};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// Controller::start(Duration::from_secs(10));
/// let mut shutdown = Controller::shutdown_handle();
///
/// tokio::spawn(async move {
///     let Shutdown { timeout } = shutdown.notified().await;
///     // persist open work within `timeout`
/// });
/// # }
/// ```
#[derive(Debug)]
pub struct Controller;

impl Controller {
    /// Starts a controller that monitors shutdown signals.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(shutdown_timeout: Duration) {
        tokio::spawn(async move {
            if let Err(error) = monitor_shutdown(shutdown_timeout).await {
                tally_log::error!(
                    "failed to monitor shutdown signals: {}",
                    tally_log::LogError(&error)
                );
            }
        });
    }

    /// Returns a [`ShutdownHandle`] to wait for the process shutdown.
    pub fn shutdown_handle() -> ShutdownHandle {
        ShutdownHandle(SHUTDOWN.subscribe())
    }

    /// Requests a shutdown of all services, as if a signal had been received.
    pub fn shutdown(timeout: Option<Duration>) {
        SHUTDOWN.send_replace(Some(Shutdown { timeout }));
    }
}

#[cfg(unix)]
async fn monitor_shutdown(timeout: Duration) -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_quit = signal(SignalKind::quit())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_hup = signal(SignalKind::hangup())?;

    let timeout = tokio::select! {
        biased;

        Some(()) = sig_int.recv() => {
            tally_log::info!("SIGINT received, exiting");
            None
        }
        Some(()) = sig_quit.recv() => {
            tally_log::info!("SIGQUIT received, exiting");
            None
        }
        Some(()) = sig_term.recv() => {
            tally_log::info!("SIGTERM received, stopping in {}s", timeout.as_secs());
            Some(timeout)
        }
        Some(()) = sig_hup.recv() => {
            tally_log::info!("SIGHUP received, stopping in {}s", timeout.as_secs());
            Some(timeout)
        }
        else => return Ok(()),
    };

    Controller::shutdown(timeout);
    Ok(())
}

#[cfg(not(unix))]
async fn monitor_shutdown(timeout: Duration) -> io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tally_log::info!("CTRL-C received, stopping in {}s", timeout.as_secs());
    Controller::shutdown(Some(timeout));
    Ok(())
}
