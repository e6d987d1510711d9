//! Common utilities shared by all Tally crates.

#![warn(missing_docs)]

mod time;

pub use self::time::*;
