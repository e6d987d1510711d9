use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::service::ServiceState;
use crate::statsd::ServerCounters;

/// Paths that are served without an API key.
const PUBLIC_PATHS: &[&str] = &["/sys/info/ping", "/sys/info/version"];

/// A middleware that rejects requests without the configured API key.
///
/// The key is read from the configured header and must match exactly. If no key is configured,
/// every request outside of the public paths is rejected with `403 Forbidden`.
///
/// Use this with [`axum::middleware::from_fn_with_state`].
pub async fn authenticate(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Response {
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let config = state.config();
    let provided = request
        .headers()
        .get(config.api_key_header())
        .and_then(|value| value.to_str().ok());

    match (config.api_key(), provided) {
        (Some(expected), Some(provided)) if expected == provided => next.run(request).await,
        _ => {
            tally_statsd::metric!(counter(ServerCounters::RequestsForbidden) += 1);
            tally_log::debug!("rejected unauthenticated request to {}", request.uri());
            (StatusCode::FORBIDDEN, "Forbidden").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::testutils::{TestServer, get};

    #[test]
    fn test_forbidden_counted() {
        let captures = tally_statsd::with_capturing_test_client(|| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let server = TestServer::new();
                let (status, _) = server.call_raw(get("/stats/report")).await;
                assert_eq!(status, StatusCode::FORBIDDEN);
            });
        });

        assert!(captures.contains(&"requests.forbidden:1|c".to_owned()));
    }
}
