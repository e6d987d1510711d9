//! Request extractors for the HTTP endpoints.

mod filter_params;

pub use self::filter_params::*;
