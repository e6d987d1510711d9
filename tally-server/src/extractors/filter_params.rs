use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{FromRequest, Request};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Deserializer};

/// Error returned when [`FilterParams`] cannot be read from a request.
#[derive(Debug, thiserror::Error)]
pub enum FilterParamsError {
    /// The request body could not be read.
    #[error("failed to read request body")]
    Body(BytesRejection),

    /// The body is not valid JSON.
    #[error("invalid json body: {0}")]
    Json(#[from] serde_json::Error),

    /// The body or query string is not a valid form.
    #[error("invalid form data: {0}")]
    Form(#[from] serde_urlencoded::de::Error),
}

impl IntoResponse for FilterParamsError {
    fn into_response(self) -> Response {
        match self {
            Self::Body(rejection) => rejection.into_response(),
            other => (StatusCode::BAD_REQUEST, other.to_string()).into_response(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Limit {
    Number(usize),
    Text(String),
}

/// Accepts the limit as a number or a numeric string. Anything else means no limit.
fn deserialize_limit<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Limit>::deserialize(deserializer)? {
        Some(Limit::Number(limit)) => limit,
        Some(Limit::Text(text)) => text.trim().parse().unwrap_or(0),
        None => 0,
    })
}

/// Query parameters of the stats endpoints.
///
/// `GET` requests read the query string. Other methods read a JSON body if the content type is
/// `application/json`, and a form body otherwise. An empty body yields the defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Key substring. Empty matches all keys.
    pub f: String,
    /// Maximum number of history entries. `0` returns all of them.
    #[serde(deserialize_with = "deserialize_limit")]
    pub counter: usize,
}

fn is_json(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("application/json"))
}

impl<S> FromRequest<S> for FilterParams
where
    S: Send + Sync,
{
    type Rejection = FilterParamsError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        if request.method() == Method::GET || request.method() == Method::HEAD {
            let query = request.uri().query().unwrap_or_default();
            return Ok(serde_urlencoded::from_str(query)?);
        }

        let json = is_json(&request);
        let body = Bytes::from_request(request, state)
            .await
            .map_err(FilterParamsError::Body)?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        Ok(if json {
            serde_json::from_slice(&body)?
        } else {
            serde_urlencoded::from_bytes(&body)?
        })
    }
}
