use axum::RequestExt;
use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use tokio::time::Instant;

use crate::statsd::ServerTimers;

/// A middleware that records the duration of every request.
///
/// Use this with [`axum::middleware::from_fn`].
pub async fn metrics(mut request: Request, next: Next) -> Response {
    let start = Instant::now();
    let matched_path = request.extract_parts::<MatchedPath>().await;
    let route = matched_path.as_ref().map_or("unknown", |m| m.as_str());

    let response = next.run(request).await;

    tally_statsd::metric!(
        timer(ServerTimers::RequestDuration) = start.elapsed(),
        route = route,
        status_code = response.status().as_str(),
    );

    response
}
