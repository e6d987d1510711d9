use std::io;

use axum::Router;
use tally_config::Config;
use tally_system::{Controller, Service, Shutdown};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;

use crate::endpoints;
use crate::middlewares::{self, CatchPanicLayer};
use crate::service::ServiceState;
use crate::statsd::ServerCounters;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] io::Error),
}

/// Build the axum application with all routes and middleware.
pub(crate) fn make_app(service: ServiceState) -> Router {
    // Layers added first are called first:
    //  - Requests go from top to bottom
    //  - Responses go from bottom to top
    let middleware = ServiceBuilder::new()
        .layer(axum::middleware::from_fn(middlewares::metrics))
        .layer(CatchPanicLayer::custom(middlewares::handle_panic))
        .layer(middlewares::trace_http_layer())
        .layer(axum::middleware::from_fn_with_state(
            service.clone(),
            middlewares::authenticate,
        ));

    endpoints::routes().layer(middleware).with_state(service)
}

/// Waits for a shutdown and then for its timeout to elapse.
async fn shutdown_deadline() {
    let Shutdown { timeout } = Controller::shutdown_handle().notified().await;
    tokio::time::sleep(timeout.unwrap_or_default()).await;
}

/// HTTP server service.
///
/// Hosts the query API. On a [`Shutdown`] the server stops accepting connections and waits for
/// open requests up to the shutdown timeout.
#[derive(Debug)]
pub struct HttpServer {
    service: ServiceState,
    listener: std::net::TcpListener,
}

impl HttpServer {
    /// Binds the listener on the configured address.
    pub fn new(config: &Config, service: ServiceState) -> Result<Self, ServerError> {
        let listener = std::net::TcpListener::bind(config.http_addr())?;
        listener.set_nonblocking(true)?;
        Ok(Self { service, listener })
    }
}

impl Service for HttpServer {
    type Interface = ();

    fn spawn_handler(self, _rx: tally_system::Receiver<Self::Interface>) -> JoinHandle<()> {
        let Self { service, listener } = self;

        tokio::spawn(async move {
            let listener = match TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(error) => {
                    tally_log::error!(
                        "failed to register http listener: {}",
                        tally_log::LogError(&error)
                    );
                    return;
                }
            };

            if let Ok(addr) = listener.local_addr() {
                tally_log::info!("spawning http server");
                tally_log::info!("  listening on http://{addr}/");
            }
            tally_statsd::metric!(counter(ServerCounters::ServerStarting) += 1);

            let mut shutdown = Controller::shutdown_handle();
            let server =
                axum::serve(listener, make_app(service)).with_graceful_shutdown(async move {
                    shutdown.notified().await;
                    tally_log::info!("shutting down http server");
                });

            tokio::select! {
                result = server => {
                    if let Err(error) = result {
                        tally_log::error!("http server failed: {}", tally_log::LogError(&error));
                    }
                }
                _ = shutdown_deadline() => {
                    tally_log::warn!("http server did not stop within the shutdown timeout");
                }
            }

            tally_log::info!("http server stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::testutils::{TestServer, get};

    #[tokio::test]
    async fn test_public_paths() {
        let server = TestServer::new();

        let (status, body) = server.call_raw(get("/sys/info/ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#""OK""#);

        let (status, body) = server.call_raw(get("/sys/info/version")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!(r#""{}""#, env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let server = TestServer::new();
        let (status, _) = server.call_raw(get("/stats/counters")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = server.call_raw(get("/nope")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_wrong_api_key() {
        let server = TestServer::new();
        let mut request = get("/stats/report");
        request
            .headers_mut()
            .insert("x-tally-statsapikey", "wrong".parse().unwrap());

        let (status, body) = server.call(request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Forbidden");
    }

    #[tokio::test]
    async fn test_no_api_key_configured() {
        let server = TestServer::with_config("{}");
        let (status, _) = server.call(get("/stats/report")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = server.call(get("/sys/info/ping")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_api_key_header() {
        let server = TestServer::with_config("http: { api_key: secret, api_key_header: x-key }");
        let request = server
            .request(Method::GET, "/stats/report")
            .body(Default::default())
            .unwrap();

        let (status, _) = server.call_raw(request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let server = TestServer::new();
        let (status, body) = server.call(get("/stats/unknown?x=1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        insta::assert_snapshot!(body, @"Unknown request: /stats/unknown?x=1");
    }
}
