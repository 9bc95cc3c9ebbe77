//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{header, HeaderMap, Method, Uri};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use dualmode::{AppConfig, Application, HttpServer, Shutdown};

/// A served application. Dropping it stops the server.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Shutdown,
    _updates: mpsc::UnboundedSender<AppConfig>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Serve `app` on an ephemeral local port.
pub async fn serve(app: Application) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let (updates, updates_rx) = mpsc::unbounded_channel();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = HttpServer::new(app).run(listener, updates_rx, signal).await;
    });

    TestServer {
        addr,
        shutdown,
        _updates: updates,
    }
}

/// Default configuration with a small worker pool.
pub fn test_config() -> AppConfig {
    AppConfig {
        workers: 2,
        ..AppConfig::default()
    }
}

/// Start a mock upstream.
///
/// - `GET /ws` accepts a WebSocket (subprotocol `chat` if offered) and
///   echoes every data frame
/// - anything else answers with a JSON description of the request
pub async fn start_mock_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let router = Router::new()
        .route("/ws", get(ws_echo))
        .fallback(describe_request);

    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    addr
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn describe_request(method: Method, uri: Uri, headers: HeaderMap) -> Json<Value> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "host": host,
    }))
}

async fn ws_echo(upgrade: WebSocketUpgrade) -> Response {
    upgrade.protocols(["chat"]).on_upgrade(echo_frames)
}

async fn echo_frames(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            message @ (Message::Text(_) | Message::Binary(_)) => {
                if socket.send(message).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Bound every await on a socket so a broken relay fails instead of hangs.
pub async fn within<F: std::future::Future>(f: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("completed within timeout")
}
