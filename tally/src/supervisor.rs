//! Keeps a single worker process alive.
//!
//! The [`Supervisor`] starts a worker through a [`WorkerSpawner`] and waits for it to exit. An
//! exit the supervisor did not ask for is a crash, and the worker is replaced right away. If the
//! replacement cannot be started, the supervisor keeps retrying. When the shutdown future
//! resolves, the worker is asked to terminate and the supervisor returns once it is gone.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::signal::unix::{Signal, SignalKind, signal};

use crate::statsd::SupervisorCounters;

/// Delay between attempts to replace a crashed worker that could not be started.
const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// A running worker process.
pub trait Worker {
    /// Returns the OS process id, if the worker is still running.
    fn id(&self) -> Option<u32>;

    /// Waits for the worker to exit.
    fn wait(&mut self) -> impl Future<Output = io::Result<ExitStatus>>;

    /// Asks the worker to shut down gracefully.
    fn terminate(&mut self) -> io::Result<()>;
}

/// Starts worker processes.
pub trait WorkerSpawner {
    /// The handle of a started worker.
    type Worker: Worker;

    /// Starts a new worker.
    fn spawn(&mut self) -> io::Result<Self::Worker>;
}

/// How a worker process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// The worker stopped after the supervisor asked it to.
    Clean,
    /// The worker exited on its own.
    Crashed {
        /// The exit status, unless waiting for the process failed.
        status: Option<ExitStatus>,
    },
}

enum Event {
    Shutdown,
    Exited(io::Result<ExitStatus>),
    Respawn,
}

/// Supervises exactly one worker.
pub struct Supervisor<S: WorkerSpawner> {
    spawner: S,
    worker: Option<S::Worker>,
    stopping: bool,
    exits: Vec<WorkerExit>,
}

impl<S> Supervisor<S>
where
    S: WorkerSpawner,
{
    /// Creates a supervisor. No worker is started until [`run`](Self::run).
    pub fn new(spawner: S) -> Self {
        Self {
            spawner,
            worker: None,
            stopping: false,
            exits: Vec::new(),
        }
    }

    /// Returns the number of tracked workers.
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        usize::from(self.worker.is_some())
    }

    /// Returns the exits observed so far, oldest first.
    #[cfg(test)]
    pub fn exits(&self) -> &[WorkerExit] {
        &self.exits
    }

    fn spawn(&mut self) -> io::Result<()> {
        let worker = self.spawner.spawn()?;
        match worker.id() {
            Some(pid) => tally_log::info!("started worker {pid}"),
            None => tally_log::info!("started worker"),
        }
        self.worker = Some(worker);
        Ok(())
    }

    fn respawn(&mut self) {
        if let Err(error) = self.spawn() {
            tally_log::error!(
                "failed to start worker, retrying in {}s: {}",
                RESPAWN_DELAY.as_secs(),
                tally_log::LogError(&error)
            );
        }
    }

    fn terminate(&mut self) {
        self.stopping = true;

        let Some(worker) = self.worker.as_mut() else {
            return;
        };

        tally_log::info!("stopping worker");
        if let Err(error) = worker.terminate() {
            tally_log::error!(
                "failed to signal worker: {}",
                tally_log::LogError(&error)
            );
        }
    }

    fn classify(&self, result: io::Result<ExitStatus>) -> WorkerExit {
        match result {
            Ok(_) if self.stopping => WorkerExit::Clean,
            Ok(status) => WorkerExit::Crashed {
                status: Some(status),
            },
            Err(error) => {
                tally_log::error!(
                    "failed to wait for worker: {}",
                    tally_log::LogError(&error)
                );
                if self.stopping {
                    WorkerExit::Clean
                } else {
                    WorkerExit::Crashed { status: None }
                }
            }
        }
    }

    /// Runs the worker until `shutdown` resolves and the worker has stopped.
    ///
    /// Returns an error if the first worker cannot be started.
    pub async fn run<F>(&mut self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        self.spawn()?;

        loop {
            let stopping = self.stopping;
            let event = match self.worker.as_mut() {
                Some(worker) => tokio::select! {
                    _ = &mut shutdown, if !stopping => Event::Shutdown,
                    result = worker.wait() => Event::Exited(result),
                },
                None if stopping => return Ok(()),
                None => tokio::select! {
                    _ = &mut shutdown => Event::Shutdown,
                    _ = tokio::time::sleep(RESPAWN_DELAY) => Event::Respawn,
                },
            };

            match event {
                Event::Shutdown => self.terminate(),
                Event::Respawn => self.respawn(),
                Event::Exited(result) => {
                    self.worker = None;
                    let exit = self.classify(result);
                    self.exits.push(exit);

                    match exit {
                        WorkerExit::Clean => tally_log::info!("worker stopped"),
                        WorkerExit::Crashed { status } => {
                            match status {
                                Some(status) => tally_log::error!("worker crashed: {status}"),
                                None => tally_log::error!("worker crashed"),
                            }

                            tally_statsd::metric!(
                                counter(SupervisorCounters::WorkerRespawns) += 1
                            );
                            self.respawn();
                        }
                    }
                }
            }
        }
    }
}

/// A worker running as a child process.
#[derive(Debug)]
pub struct ProcessWorker {
    child: Child,
}

impl Worker for ProcessWorker {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    fn terminate(&mut self) -> io::Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid worker pid"))?;

        // SAFETY: `kill` has no memory safety requirements. The pid belongs to our child, which
        // has not been reaped yet.
        match unsafe { libc::kill(pid, libc::SIGTERM) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

/// Starts workers by running this executable again with `--worker`.
#[derive(Debug)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    /// Creates a spawner that passes on the arguments of the current process.
    pub fn from_env() -> io::Result<Self> {
        let program = std::env::current_exe()?;
        let mut args: Vec<OsString> = std::env::args_os().skip(1).collect();
        args.push("--worker".into());
        Ok(Self { program, args })
    }
}

impl WorkerSpawner for ProcessSpawner {
    type Worker = ProcessWorker;

    fn spawn(&mut self) -> io::Result<Self::Worker> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()?;

        Ok(ProcessWorker { child })
    }
}

/// The signals that stop the supervisor.
pub struct TerminationSignals {
    term: Signal,
    hup: Signal,
    int: Signal,
    quit: Signal,
}

impl TerminationSignals {
    /// Installs the signal handlers.
    ///
    /// Must be called from within a tokio runtime, before any worker is started.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            hup: signal(SignalKind::hangup())?,
            int: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    /// Waits for the first termination signal.
    pub async fn recv(mut self) {
        let name = tokio::select! {
            _ = self.term.recv() => "SIGTERM",
            _ = self.hup.recv() => "SIGHUP",
            _ = self.int.recv() => "SIGINT",
            _ = self.quit.recv() => "SIGQUIT",
        };

        tally_log::info!("{name} received, stopping supervisor");
    }
}
