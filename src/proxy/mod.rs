//! Reverse proxy relay.
//!
//! # Data Flow
//! ```text
//! Request below a mount prefix (path already relative to the mount)
//!     → plain HTTP: http.rs (rewrite URI + Host, stream body both ways)
//!     → WebSocket:  websocket.rs (connect upstream, upgrade client)
//!                   → session.rs (two relay tasks, first to finish ends both)
//! ```
//!
//! # Design Decisions
//! - Only the Host header is rewritten; everything else is relayed as is
//! - Upstream failures never escape a session: HTTP gets 502, WebSocket
//!   clients get a close frame
//! - Unknown WebSocket frames end the session
//! - `https` upstreams are reached over rustls with the webpki roots, and
//!   their WebSocket routes over `wss`

pub mod http;
pub mod session;
pub mod websocket;

use std::sync::Arc;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{Request, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use url::Url;

pub use session::ProxySession;

use crate::app::Mountable;
use crate::http::websocket::{is_upgrade_request, WebSocketError};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid upstream `{url}`: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("upstream websocket connect failed: {0}")]
    Connect(String),

    #[error("unrecognised websocket frame `{0}`")]
    UnknownFrame(&'static str),

    #[error(transparent)]
    WebSocket(#[from] WebSocketError),

    #[error("relay task failed: {0}")]
    Task(String),
}

impl ProxyError {
    /// Metrics label.
    pub fn reason(&self) -> &'static str {
        match self {
            ProxyError::InvalidUpstream { .. } => "invalid_upstream",
            ProxyError::Upstream(_) => "upstream",
            ProxyError::Connect(_) => "connect",
            ProxyError::UnknownFrame(_) => "unknown_frame",
            ProxyError::WebSocket(_) => "websocket",
            ProxyError::Task(_) => "task",
        }
    }
}

/// A mountable relay to one upstream base URL.
pub struct ReverseProxy {
    upstream: Url,
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

/// Relay for `upstream` (an `http://` or `https://` base URL, optionally
/// with a base path).
pub fn make_proxy(upstream: &str) -> Result<ReverseProxy, ProxyError> {
    let invalid = |reason: &str| ProxyError::InvalidUpstream {
        url: upstream.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(upstream).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }

    // Both the HTTP client and the WebSocket connector use the process
    // default provider. Another component may already have installed one.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let connector = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    let client = Client::builder(TokioExecutor::new()).build(connector);
    Ok(ReverseProxy { upstream: url, client })
}

impl ReverseProxy {
    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// `host[:port]` as sent in the Host header.
    pub(crate) fn authority(&self) -> String {
        let host = self.upstream.host_str().unwrap_or_default();
        match self.upstream.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Upstream URI for a request URI relative to the mount: base path
    /// joined with the request path, query kept.
    pub(crate) fn target(&self, uri: &Uri, websocket: bool) -> Result<Uri, ProxyError> {
        let invalid = |reason: String| ProxyError::InvalidUpstream {
            url: self.upstream.to_string(),
            reason,
        };

        let scheme = match (self.upstream.scheme(), websocket) {
            ("https", true) => "wss",
            (_, true) => "ws",
            (scheme, false) => scheme,
        };
        let base = self.upstream.path().trim_end_matches('/');
        let path_and_query = match uri.query() {
            Some(query) => format!("{}{}?{}", base, uri.path(), query),
            None => format!("{}{}", base, uri.path()),
        };

        let mut parts = uri.clone().into_parts();
        parts.scheme = Some(scheme.parse::<Scheme>().map_err(|e| invalid(e.to_string()))?);
        parts.authority = Some(
            self.authority()
                .parse::<Authority>()
                .map_err(|e| invalid(e.to_string()))?,
        );
        parts.path_and_query = Some(
            path_and_query
                .parse::<PathAndQuery>()
                .map_err(|e| invalid(e.to_string()))?,
        );
        Uri::from_parts(parts).map_err(|e| invalid(e.to_string()))
    }
}

impl Mountable for ReverseProxy {
    fn call(self: Arc<Self>, req: Request<Body>) -> BoxFuture<'static, Response> {
        async move {
            if is_upgrade_request(req.headers()) {
                websocket::relay(&self, req).await
            } else {
                http::forward(&self, req).await
            }
        }
        .boxed()
    }
}

impl std::fmt::Debug for ReverseProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseProxy")
            .field("upstream", &self.upstream.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Listener that records the first byte a client sends, then hangs up.
    pub(crate) async fn first_byte_listener() -> (std::net::SocketAddr, oneshot::Receiver<u8>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut byte = [0u8; 1];
            if socket.read_exact(&mut byte).await.is_ok() {
                let _ = tx.send(byte[0]);
            }
        });
        (addr, rx)
    }

    /// First byte of a TLS handshake record.
    pub(crate) const TLS_HANDSHAKE: u8 = 0x16;

    #[test]
    fn test_make_proxy_rejects_bad_upstreams() {
        assert!(make_proxy("not a url").is_err());
        assert!(make_proxy("ftp://example.com").is_err());
        assert!(make_proxy("http://127.0.0.1:8000").is_ok());
    }

    #[test]
    fn test_target_joins_base_path_and_keeps_query() {
        let proxy = make_proxy("http://127.0.0.1:8000/v1/").unwrap();
        let uri: Uri = "/items/7?full=1".parse().unwrap();
        assert_eq!(
            proxy.target(&uri, false).unwrap().to_string(),
            "http://127.0.0.1:8000/v1/items/7?full=1"
        );
        assert_eq!(proxy.target(&uri, true).unwrap().to_string(), "ws://127.0.0.1:8000/v1/items/7?full=1");
    }

    #[test]
    fn test_target_websocket_scheme_follows_tls() {
        let proxy = make_proxy("https://example.com").unwrap();
        let uri: Uri = "/".parse().unwrap();
        assert_eq!(proxy.target(&uri, true).unwrap().to_string(), "wss://example.com/");
        assert_eq!(proxy.authority(), "example.com");
    }

    #[tokio::test]
    async fn test_https_upstream_is_dialed_over_tls() {
        let (addr, first_byte) = first_byte_listener().await;
        let proxy = Arc::new(make_proxy(&format!("https://{}", addr)).unwrap());

        let req = Request::get("/x").body(Body::empty()).unwrap();
        let response = tokio::time::timeout(std::time::Duration::from_secs(5), proxy.call(req))
            .await
            .unwrap();

        // The listener does not speak TLS, so the relay fails after a ClientHello.
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(first_byte.await.unwrap(), TLS_HANDSHAKE);
    }
}
