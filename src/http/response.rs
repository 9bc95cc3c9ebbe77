//! Response coercion.
//!
//! Handlers return a [`Reply`]: a bare body, a `(body, status)` or
//! `(body, headers)` pair, a `(body, status, headers)` triple, or a finished
//! [`Response`]. [`make_response`] turns any of these into a canonical
//! response.
//!
//! # Rules
//! - An empty body (`ReplyBody::None`) is always an error
//! - JSON bodies are served as `application/json` with status 200
//! - Text and bytes bodies use the given status, else 200
//! - An explicit status always wins
//! - Explicit headers are merged into a pre-built response: each named
//!   header is replaced, every other header is kept

use std::collections::HashSet;

use axum::body::{Body, Bytes};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidResponseError {
    #[error("handler returned no response body")]
    MissingBody,

    #[error("handler returned invalid status code {0}")]
    Status(u16),

    #[error("handler returned invalid header `{name}`")]
    Header { name: String },

    #[error("response body could not be serialized: {0}")]
    Json(String),
}

/// The body part of a handler's return value.
#[derive(Debug)]
pub enum ReplyBody {
    None,
    Text(String),
    Bytes(Bytes),
    Json(serde_json::Value),
    Response(Response),
}

/// Header pairs attached to a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPairs(Vec<(String, String)>);

impl HeaderPairs {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for HeaderPairs {
    fn from(pairs: Vec<(K, V)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for HeaderPairs {
    fn from(pairs: [(K, V); N]) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<HeaderMap> for HeaderPairs {
    fn from(map: HeaderMap) -> Self {
        Self(
            map.iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
                .collect(),
        )
    }
}

/// Second element of a pair: a status or a header collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyMeta {
    Status(u16),
    Headers(HeaderPairs),
}

impl From<u16> for ReplyMeta {
    fn from(status: u16) -> Self {
        ReplyMeta::Status(status)
    }
}

/// Out-of-range values coerce to status 0, which is rejected.
impl From<i32> for ReplyMeta {
    fn from(status: i32) -> Self {
        ReplyMeta::Status(u16::try_from(status).unwrap_or(0))
    }
}

impl From<StatusCode> for ReplyMeta {
    fn from(status: StatusCode) -> Self {
        ReplyMeta::Status(status.as_u16())
    }
}

impl From<HeaderPairs> for ReplyMeta {
    fn from(headers: HeaderPairs) -> Self {
        ReplyMeta::Headers(headers)
    }
}

impl From<HeaderMap> for ReplyMeta {
    fn from(headers: HeaderMap) -> Self {
        ReplyMeta::Headers(headers.into())
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for ReplyMeta {
    fn from(pairs: Vec<(K, V)>) -> Self {
        ReplyMeta::Headers(pairs.into())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for ReplyMeta {
    fn from(pairs: [(K, V); N]) -> Self {
        ReplyMeta::Headers(pairs.into())
    }
}

/// Status part of a triple.
pub trait IntoStatus {
    fn into_status(self) -> u16;
}

impl IntoStatus for u16 {
    fn into_status(self) -> u16 {
        self
    }
}

impl IntoStatus for i32 {
    fn into_status(self) -> u16 {
        u16::try_from(self).unwrap_or(0)
    }
}

impl IntoStatus for StatusCode {
    fn into_status(self) -> u16 {
        self.as_u16()
    }
}

/// A handler's raw return value.
#[derive(Debug)]
pub enum Reply {
    Bare(ReplyBody),
    Pair(ReplyBody, ReplyMeta),
    Triple(ReplyBody, u16, HeaderPairs),
}

impl Reply {
    /// JSON body from anything serializable.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(|v| Reply::Bare(ReplyBody::Json(v)))
    }

    /// The empty reply; coercing it always fails.
    pub fn none() -> Self {
        Reply::Bare(ReplyBody::None)
    }
}

impl From<&str> for ReplyBody {
    fn from(s: &str) -> Self {
        ReplyBody::Text(s.to_string())
    }
}

impl From<String> for ReplyBody {
    fn from(s: String) -> Self {
        ReplyBody::Text(s)
    }
}

impl From<Bytes> for ReplyBody {
    fn from(b: Bytes) -> Self {
        ReplyBody::Bytes(b)
    }
}

impl From<Vec<u8>> for ReplyBody {
    fn from(b: Vec<u8>) -> Self {
        ReplyBody::Bytes(Bytes::from(b))
    }
}

impl From<serde_json::Value> for ReplyBody {
    fn from(v: serde_json::Value) -> Self {
        ReplyBody::Json(v)
    }
}

impl From<Response> for ReplyBody {
    fn from(r: Response) -> Self {
        ReplyBody::Response(r)
    }
}

impl From<ReplyBody> for Reply {
    fn from(body: ReplyBody) -> Self {
        Reply::Bare(body)
    }
}

macro_rules! reply_from_body {
    ($($ty:ty),* $(,)?) => {$(
        impl From<$ty> for Reply {
            fn from(body: $ty) -> Self {
                Reply::Bare(body.into())
            }
        }

        impl From<Option<$ty>> for Reply {
            fn from(body: Option<$ty>) -> Self {
                Reply::Bare(body.map(Into::into).unwrap_or(ReplyBody::None))
            }
        }

        impl<M: Into<ReplyMeta>> From<($ty, M)> for Reply {
            fn from((body, meta): ($ty, M)) -> Self {
                Reply::Pair(body.into(), meta.into())
            }
        }

        impl<S: IntoStatus, H: Into<HeaderPairs>> From<($ty, S, H)> for Reply {
            fn from((body, status, headers): ($ty, S, H)) -> Self {
                Reply::Triple(body.into(), status.into_status(), headers.into())
            }
        }
    )*};
}

reply_from_body!(&str, String, Bytes, Vec<u8>, serde_json::Value, Response);

/// Coerce a handler's return value into a canonical response.
pub fn make_response(reply: Reply) -> Result<Response, InvalidResponseError> {
    let (body, status, headers) = match reply {
        Reply::Bare(body) => (body, None, None),
        Reply::Pair(body, ReplyMeta::Status(status)) => (body, Some(status), None),
        Reply::Pair(body, ReplyMeta::Headers(headers)) => (body, None, Some(headers)),
        Reply::Triple(body, status, headers) => (body, Some(status), Some(headers)),
    };

    let status = status
        .map(|code| StatusCode::from_u16(code).map_err(|_| InvalidResponseError::Status(code)))
        .transpose()?;

    let mut response = match body {
        ReplyBody::None => return Err(InvalidResponseError::MissingBody),
        ReplyBody::Response(response) => response,
        ReplyBody::Text(text) => with_content_type(Response::new(Body::from(text)), "text/plain; charset=utf-8"),
        ReplyBody::Bytes(bytes) => with_content_type(Response::new(Body::from(bytes)), "application/octet-stream"),
        ReplyBody::Json(value) => {
            let bytes = serde_json::to_vec(&value).map_err(|e| InvalidResponseError::Json(e.to_string()))?;
            with_content_type(Response::new(Body::from(bytes)), "application/json")
        }
    };

    if let Some(status) = status {
        *response.status_mut() = status;
    }
    if let Some(headers) = headers {
        merge_headers(response.headers_mut(), &headers)?;
    }
    Ok(response)
}

fn with_content_type(mut response: Response, content_type: &'static str) -> Response {
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn merge_headers(target: &mut HeaderMap, headers: &HeaderPairs) -> Result<(), InvalidResponseError> {
    let mut replaced = HashSet::new();
    for (name, value) in headers.iter() {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| InvalidResponseError::Header { name: name.to_string() })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| InvalidResponseError::Header { name: name.to_string() })?;
        if replaced.insert(header_name.clone()) {
            target.remove(&header_name);
        }
        target.append(header_name, header_value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_mapping_becomes_json() {
        let response = make_response(json!({"a": 1}).into()).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(body_text(response).await, r#"{"a":1}"#);
    }

    #[test]
    fn test_pair_with_status() {
        let response = make_response(("missing", 404).into()).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_pair_with_headers() {
        let response = make_response(("ok", [("X-Test", "1")]).into()).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-test"], "1");
        assert!(response.headers().contains_key(CONTENT_TYPE));
    }

    #[test]
    fn test_headers_merge_into_prebuilt_response() {
        let mut prebuilt = Response::new(Body::from("x"));
        prebuilt.headers_mut().insert("x-existing", HeaderValue::from_static("keep"));
        prebuilt.headers_mut().insert("x-test", HeaderValue::from_static("old"));

        let response = make_response((prebuilt, 201u16, vec![("X-Test", "1")]).into()).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-existing"], "keep");
        assert_eq!(response.headers().get_all("x-test").iter().count(), 1);
        assert_eq!(response.headers()["x-test"], "1");
    }

    #[test]
    fn test_explicit_status_overrides_json_default() {
        let response = make_response((json!([1, 2]), StatusCode::ACCEPTED).into()).unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_invalid_replies() {
        assert_eq!(
            make_response(Reply::none()).unwrap_err(),
            InvalidResponseError::MissingBody
        );
        assert_eq!(
            make_response(Option::<String>::None.into()).unwrap_err(),
            InvalidResponseError::MissingBody
        );
        assert_eq!(
            make_response(("x", 1000u16).into()).unwrap_err(),
            InvalidResponseError::Status(1000)
        );
        assert!(matches!(
            make_response(("x", [("bad header", "1")]).into()).unwrap_err(),
            InvalidResponseError::Header { .. }
        ));
    }
}
