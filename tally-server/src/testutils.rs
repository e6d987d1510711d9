use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, Method, Request, StatusCode, request};
use tally_common::UnixTimestamp;
use tally_config::Config;
use tally_metrics::{Aggregator, AggregatorService, MergeDatagram};
use tally_system::{Addr, Service};
use tower::ServiceExt;

use crate::service::ServiceState;
use crate::services::server::make_app;
use crate::services::sink::SinkService;

/// The API key configured for [`TestServer`].
pub const API_KEY: &str = "secret";

/// Creates an unauthenticated `GET` request.
pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// The query API backed by a real aggregator and a sink without address.
pub struct TestServer {
    state: ServiceState,
    app: Router,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_config(&format!("http: {{ api_key: {API_KEY} }}"))
    }

    pub fn with_config(yaml: &str) -> Self {
        let config = Arc::new(Config::from_yaml(yaml).unwrap());
        let startup_time = UnixTimestamp::now();

        let sink = SinkService::new(None, startup_time).start();
        let aggregator =
            AggregatorService::new(config.collector().clone(), None, startup_time).start();

        let state = ServiceState::new(config, aggregator, sink, startup_time);
        let app = make_app(state.clone());
        Self { state, app }
    }

    pub fn aggregator(&self) -> &Addr<Aggregator> {
        self.state.aggregator()
    }

    pub fn merge(&self, payload: &[u8]) {
        self.aggregator().send(MergeDatagram::parse(payload));
    }

    /// Starts a request that carries the API key.
    pub fn request(&self, method: Method, uri: &str) -> request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(self.state.config().api_key_header(), API_KEY)
    }

    /// Sends a request, adding the API key if it is missing.
    pub async fn call(&self, mut request: Request<Body>) -> (StatusCode, String) {
        let header = self.state.config().api_key_header();
        if !request.headers().contains_key(header) {
            let name = HeaderName::from_bytes(header.as_bytes()).unwrap();
            request.headers_mut().insert(name, API_KEY.parse().unwrap());
        }

        self.call_raw(request).await
    }

    /// Sends a request as is.
    pub async fn call_raw(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }
}
