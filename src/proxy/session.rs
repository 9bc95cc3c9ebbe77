//! One relayed WebSocket connection.
//!
//! # Responsibilities
//! - Run exactly two relay tasks: client → upstream and upstream → client
//! - Stop the other task as soon as one finishes, normally or not
//! - Close both sides, ignoring errors from sides already closed
//!
//! # Design Decisions
//! - Each task owns its source stream; sinks are shared so the session can
//!   close both after the tasks are gone
//! - Ping/pong is answered by the transports and not relayed
//! - A close observed on one side is passed on to the other with its code

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::http::websocket::{
    CloseReason, Frame, FrameSink, FrameStream, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL,
};
use crate::observability::metrics;
use crate::proxy::ProxyError;

/// Upper bound for sending the final close frames.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type SharedSink = Arc<Mutex<FrameSink>>;

#[derive(Debug)]
pub struct ProxySession {
    id: Uuid,
    upstream: String,
}

impl ProxySession {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            upstream: upstream.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Relay until either side closes, disconnects or fails.
    pub async fn run(
        self,
        client: (FrameSink, FrameStream),
        upstream: (FrameSink, FrameStream),
    ) -> Result<(), ProxyError> {
        let _active = metrics::ProxySessionGuard::new();
        tracing::debug!(session_id = %self.id, upstream = %self.upstream, "Proxy session started");

        let (client_sink, client_stream) = client;
        let (upstream_sink, upstream_stream) = upstream;
        let client_sink: SharedSink = Arc::new(Mutex::new(client_sink));
        let upstream_sink: SharedSink = Arc::new(Mutex::new(upstream_sink));

        let mut to_upstream = tokio::spawn(pump(client_stream, Arc::clone(&upstream_sink)));
        let mut to_client = tokio::spawn(pump(upstream_stream, Arc::clone(&client_sink)));

        let (direction, joined) = tokio::select! {
            joined = &mut to_upstream => {
                to_client.abort();
                let _ = (&mut to_client).await;
                ("client->upstream", joined)
            }
            joined = &mut to_client => {
                to_upstream.abort();
                let _ = (&mut to_upstream).await;
                ("upstream->client", joined)
            }
        };
        let outcome = joined.unwrap_or_else(|e| Err(ProxyError::Task(e.to_string())));

        let (code, reason) = match &outcome {
            Ok(Some(close)) if is_sendable(close.code) => (close.code, close.reason.clone()),
            Ok(_) => (CLOSE_NORMAL, String::new()),
            Err(_) => (CLOSE_INTERNAL_ERROR, String::new()),
        };
        close_quietly(&client_sink, code, &reason).await;
        close_quietly(&upstream_sink, code, &reason).await;

        match outcome {
            Ok(_) => {
                tracing::debug!(session_id = %self.id, direction, code, "Proxy session ended");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, direction, error = %e, "Proxy session failed");
                metrics::record_proxy_error(e.reason());
                Err(e)
            }
        }
    }
}

/// Forward frames from `source` into `sink` until a close or disconnect.
/// Returns the close frame's reason if one was seen.
async fn pump(mut source: FrameStream, sink: SharedSink) -> Result<Option<CloseReason>, ProxyError> {
    while let Some(next) = source.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Peer disconnected");
                return Ok(None);
            }
        };
        match frame {
            Frame::Close(reason) => return Ok(reason),
            Frame::Ping(_) | Frame::Pong(_) => {}
            Frame::Unknown(kind) => return Err(ProxyError::UnknownFrame(kind)),
            frame @ (Frame::Text(_) | Frame::Binary(_)) => {
                sink.lock().await.send(frame).await?;
            }
        }
    }
    Ok(None)
}

/// Codes that may not appear in a close frame on the wire.
fn is_sendable(code: u16) -> bool {
    !matches!(code, 1005 | 1006 | 1015)
}

async fn close_quietly(sink: &SharedSink, code: u16, reason: &str) {
    let close = async {
        let mut sink = sink.lock().await;
        let _ = sink.send(Frame::close(code, reason)).await;
        let _ = sink.close().await;
    };
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, close).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::websocket::frame_pair;

    async fn recv(stream: &mut FrameStream) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("frame within timeout")
            .map(|r| r.expect("frame"))
    }

    #[tokio::test]
    async fn test_relays_both_directions_then_upstream_close_reaches_client() {
        let ((mut client_tx, mut client_rx), client_side) = frame_pair();
        let ((mut upstream_tx, mut upstream_rx), upstream_side) = frame_pair();
        let session = tokio::spawn(ProxySession::new("test").run(client_side, upstream_side));

        client_tx.send(Frame::Text("hi".into())).await.unwrap();
        assert_eq!(recv(&mut upstream_rx).await, Some(Frame::Text("hi".into())));

        upstream_tx.send(Frame::Binary(vec![1, 2].into())).await.unwrap();
        assert_eq!(recv(&mut client_rx).await, Some(Frame::Binary(vec![1, 2].into())));

        upstream_tx.send(Frame::close(4000, "bye")).await.unwrap();
        assert_eq!(recv(&mut client_rx).await, Some(Frame::close(4000, "bye")));

        assert!(session.await.unwrap().is_ok());

        // Nothing reaches the client after the close.
        let _ = upstream_tx.send(Frame::Text("late".into())).await;
        assert_eq!(recv(&mut client_rx).await, None);
    }

    #[tokio::test]
    async fn test_client_disconnect_closes_upstream() {
        let ((client_tx, client_rx), client_side) = frame_pair();
        let ((_upstream_tx, mut upstream_rx), upstream_side) = frame_pair();
        let session = tokio::spawn(ProxySession::new("test").run(client_side, upstream_side));

        drop(client_tx);
        drop(client_rx);

        assert_eq!(recv(&mut upstream_rx).await, Some(Frame::close(CLOSE_NORMAL, "")));
        assert!(session.await.unwrap().is_ok());
        assert_eq!(recv(&mut upstream_rx).await, None);
    }

    #[tokio::test]
    async fn test_unknown_frame_tears_down_session() {
        let ((mut client_tx, mut client_rx), client_side) = frame_pair();
        let ((_upstream_tx, mut upstream_rx), upstream_side) = frame_pair();
        let session = tokio::spawn(ProxySession::new("test").run(client_side, upstream_side));

        client_tx.send(Frame::Unknown("raw")).await.unwrap();

        let result = session.await.unwrap();
        assert!(matches!(result, Err(ProxyError::UnknownFrame("raw"))));
        assert_eq!(recv(&mut client_rx).await, Some(Frame::close(CLOSE_INTERNAL_ERROR, "")));
        assert_eq!(recv(&mut upstream_rx).await, Some(Frame::close(CLOSE_INTERNAL_ERROR, "")));
    }

    #[tokio::test]
    async fn test_ping_is_not_relayed() {
        let ((mut client_tx, _client_rx), client_side) = frame_pair();
        let ((_upstream_tx, mut upstream_rx), upstream_side) = frame_pair();
        let _session = tokio::spawn(ProxySession::new("test").run(client_side, upstream_side));

        client_tx.send(Frame::Ping(vec![9].into())).await.unwrap();
        client_tx.send(Frame::Text("after".into())).await.unwrap();
        assert_eq!(recv(&mut upstream_rx).await, Some(Frame::Text("after".into())));
    }
}
