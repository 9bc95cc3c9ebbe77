//! Per-request context handed to handlers and middleware.
//!
//! # Responsibilities
//! - Carry the protocol kind (http, websocket, lifespan)
//! - Expose method, URI, headers and the buffered body
//! - Expose typed path parameters and the resolved endpoint name
//! - Hold request-scoped extensions middleware can use to talk to handlers
//!
//! # Design Decisions
//! - Owned by exactly one request; moved (not shared) into the worker pool
//! - HTTP bodies are buffered before the middleware chain runs so sync
//!   handlers never touch async I/O

use std::fmt;

use axum::body::Bytes;
use axum::http::{Extensions, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;

use crate::routing::converter::ParamValue;
use crate::routing::pattern::PathParams;

/// Header carrying the request id set by the host layers.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Which kind of connection a context belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Http,
    WebSocket,
    Lifespan,
}

pub struct RequestContext {
    kind: ProtocolKind,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: PathParams,
    endpoint: Option<String>,
    extensions: Extensions,
}

impl RequestContext {
    pub fn new(kind: ProtocolKind, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            kind,
            method,
            uri,
            headers,
            body,
            params: PathParams::default(),
            endpoint: None,
            extensions: Extensions::new(),
        }
    }

    /// Context passed to startup/shutdown hooks.
    pub fn lifespan() -> Self {
        Self::new(
            ProtocolKind::Lifespan,
            Method::GET,
            Uri::from_static("/"),
            HeaderMap::new(),
            Bytes::new(),
        )
    }

    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query_string(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Decoded query pairs in request order.
    pub fn query(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default()
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query().into_iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Header value as text, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(X_REQUEST_ID)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// `application/x-www-form-urlencoded` body pairs.
    pub fn form(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(&self.body).into_owned().collect()
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Namespaced endpoint name, once the route is resolved.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub(crate) fn resolved(&mut self, endpoint: &str, params: PathParams) {
        self.endpoint = Some(endpoint.to_string());
        self.params = params;
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("endpoint", &self.endpoint)
            .field("params", &self.params)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_and_form_decoding() {
        let ctx = RequestContext::new(
            ProtocolKind::Http,
            Method::POST,
            Uri::from_static("/search?q=hello%20world&page=2"),
            HeaderMap::new(),
            Bytes::from_static(b"name=a+b&x=1"),
        );
        assert_eq!(ctx.query_param("q").as_deref(), Some("hello world"));
        assert_eq!(ctx.query_param("page").as_deref(), Some("2"));
        assert_eq!(ctx.form()[0], ("name".to_string(), "a b".to_string()));
    }

    #[test]
    fn test_json_body() {
        let ctx = RequestContext::new(
            ProtocolKind::Http,
            Method::POST,
            Uri::from_static("/"),
            HeaderMap::new(),
            Bytes::from_static(br#"{"a":1}"#),
        );
        let value: serde_json::Value = ctx.json().unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_lifespan_context() {
        let ctx = RequestContext::lifespan();
        assert_eq!(ctx.kind(), ProtocolKind::Lifespan);
        assert!(ctx.endpoint().is_none());
    }
}
