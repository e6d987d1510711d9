use axum::Json;

/// Liveness probe.
pub async fn ping() -> Json<&'static str> {
    Json("OK")
}

/// Returns the version of this build.
pub async fn version() -> Json<&'static str> {
    Json(env!("CARGO_PKG_VERSION"))
}
