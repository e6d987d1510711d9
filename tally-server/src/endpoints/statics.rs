use axum::http::{StatusCode, Uri};

/// Fallback for all routes without a handler.
pub async fn unknown_request(uri: Uri) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("Unknown request: {uri}"))
}
