//! WebSocket relay setup: connect upstream, then upgrade the client.
//!
//! The upstream handshake happens first so its chosen subprotocol can be
//! echoed in the client's handshake response. If the upstream cannot be
//! reached the client is still upgraded and then closed with 1014.

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::FromRequestParts;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::{Request, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::http::websocket::{split_axum, split_tungstenite, Frame, CLOSE_BAD_GATEWAY};
use crate::observability::metrics;
use crate::proxy::session::ProxySession;
use crate::proxy::{ProxyError, ReverseProxy};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake headers the upstream connection generates itself.
const HANDSHAKE_HEADERS: [HeaderName; 7] = [
    header::HOST,
    header::CONNECTION,
    header::UPGRADE,
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::CONTENT_LENGTH,
];

pub(crate) async fn relay(proxy: &ReverseProxy, req: Request<Body>) -> Response {
    let (mut parts, _body) = req.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let connected = match proxy.target(&parts.uri, true) {
        Ok(target) => connect(&target, &parts.headers).await.map(|c| (target, c)),
        Err(e) => Err(e),
    };

    match connected {
        Ok((target, (socket, protocol))) => {
            let upgrade = match protocol {
                Some(protocol) => upgrade.protocols([protocol]),
                None => upgrade,
            };
            upgrade.on_upgrade(move |client| async move {
                let session = ProxySession::new(target.to_string());
                let _ = session.run(split_axum(client), split_tungstenite(socket)).await;
            })
        }
        Err(e) => {
            tracing::warn!(upstream = %proxy.upstream(), error = %e, "Upstream websocket unavailable");
            metrics::record_proxy_error(e.reason());
            upgrade.on_upgrade(|client| async move {
                let (mut sink, _stream) = split_axum(client);
                let _ = sink.send(Frame::close(CLOSE_BAD_GATEWAY, "upstream unavailable")).await;
                let _ = sink.close().await;
            })
        }
    }
}

/// Open the upstream socket, offering the client's headers (including its
/// subprotocols). Returns the subprotocol the upstream picked.
async fn connect(target: &Uri, client_headers: &HeaderMap) -> Result<(UpstreamSocket, Option<String>), ProxyError> {
    let mut request = target
        .to_string()
        .into_client_request()
        .map_err(|e| ProxyError::Connect(e.to_string()))?;

    for (name, value) in client_headers {
        if !HANDSHAKE_HEADERS.contains(name) {
            request.headers_mut().append(name.clone(), value.clone());
        }
    }

    let (socket, response) = connect_async(request)
        .await
        .map_err(|e| ProxyError::Connect(e.to_string()))?;

    let protocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    tracing::debug!(uri = %target, protocol = ?protocol, "Upstream websocket connected");
    Ok((socket, protocol))
}
