//! Configuration for the Tally CLI and worker.
//!
//! The configuration is read from `config.yml` in a config folder. Every section is optional and
//! falls back to its defaults:
//!
//! ```yaml
//! udp:
//!   port: 8125
//! http:
//!   api_key: my-secret-key
//! sink:
//!   host: graphite.internal
//!   port: 2003
//! collector:
//!   flush_interval: 10000
//!   percent_threshold: [90, 99]
//! ```
//!
//! See [`Config`] for accessors of all options.

#![warn(missing_docs)]

mod config;

pub use self::config::*;
