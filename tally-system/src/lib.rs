//! Foundational system components for Tally's services.
//!
//! Tally's worker is composed of long-running services that communicate by message passing. See
//! [`Service`] for how a service is declared and started, and [`Controller`] for the process-wide
//! shutdown signal every service listens to.
#![warn(missing_docs)]

mod controller;
mod service;

pub use self::controller::*;
pub use self::service::*;
