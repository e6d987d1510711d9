//! The Tally daemon.
//!
//! Tally receives statsd datagrams over UDP, aggregates them into fixed windows and pushes
//! summaries to a Graphite sink. It also serves the live metrics and a flush history over HTTP.
//!
//! # Process model
//!
//! `tally run` starts a supervisor that keeps exactly one worker process alive. The worker is the
//! same executable started with `run --worker` and hosts all services. If the worker crashes, the
//! supervisor logs the exit and starts a replacement immediately. Termination signals are
//! forwarded to the worker, and the supervisor exits once the worker has stopped.
//!
//! With `--master-only`, the worker runs directly in the foreground without a supervisor.
//!
//! # Configuration
//!
//! The configuration is read from `config.yml` in the folder passed with `--config`. Ports, the
//! API key, the sink and the log level can be overridden on the command line or through
//! environment variables. Run `tally config show` to print the effective configuration.

mod cli;
mod cliapp;
mod setup;
mod statsd;
mod supervisor;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            tally_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
