//! Middlewares for the HTTP server.
//!
//! See the server startup in [`HttpServer`](crate::services::server::HttpServer) for where these
//! middlewares are registered.

mod authenticate;
mod handle_panic;
mod metrics;
mod trace;

pub use self::authenticate::*;
pub use self::handle_panic::*;
pub use self::metrics::*;
pub use self::trace::*;
