//! Web server endpoints.
//!
//! The system info endpoints are public. All other routes, including the fallback for unknown
//! paths, require the API key checked by [`authenticate`](crate::middlewares::authenticate).

use axum::Router;
use axum::routing::get;

use crate::service::ServiceState;

mod stats;
mod statics;
mod sysinfo;

/// Returns the router with all endpoints of the query API.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route("/sys/info/ping", get(sysinfo::ping))
        .route("/sys/info/version", get(sysinfo::version))
        .route("/stats/report", get(stats::report))
        .route("/stats/stats", get(stats::stats))
        .route("/stats/counters", get(stats::counters).post(stats::counters))
        .route("/stats/timers", get(stats::timers).post(stats::timers))
        .route("/stats/gauges", get(stats::gauges).post(stats::gauges))
        .route("/stats/current", get(stats::current).post(stats::current))
        .route("/stats/history", get(stats::history).post(stats::history))
        .fallback(statics::unknown_request)
}
