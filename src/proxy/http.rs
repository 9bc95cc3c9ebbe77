//! Plain HTTP relay.
//!
//! Method, headers and body go upstream untouched except for the URI and
//! the Host header. Both bodies are streamed, never buffered.

use axum::body::Body;
use axum::http::header::HOST;
use axum::http::{HeaderValue, Request, StatusCode, Version};
use axum::response::{IntoResponse, Response};

use crate::observability::metrics;
use crate::proxy::{ProxyError, ReverseProxy};

pub(crate) async fn forward(proxy: &ReverseProxy, req: Request<Body>) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match try_forward(proxy, req).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                upstream = %proxy.upstream(),
                method = %method,
                path = %path,
                error = %e,
                "Upstream request failed"
            );
            metrics::record_proxy_error(e.reason());
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

async fn try_forward(proxy: &ReverseProxy, req: Request<Body>) -> Result<Response, ProxyError> {
    let (mut parts, body) = req.into_parts();

    parts.uri = proxy.target(&parts.uri, false)?;
    // The pooled client speaks HTTP/1.1 upstream whatever the client used.
    parts.version = Version::HTTP_11;

    let host = HeaderValue::from_str(&proxy.authority()).map_err(|e| ProxyError::InvalidUpstream {
        url: proxy.upstream().to_string(),
        reason: e.to_string(),
    })?;
    parts.headers.insert(HOST, host);

    tracing::debug!(uri = %parts.uri, method = %parts.method, "Forwarding request");

    let response = proxy
        .client
        .request(Request::from_parts(parts, body))
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}
