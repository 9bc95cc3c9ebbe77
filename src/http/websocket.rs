//! WebSocket primitives.
//!
//! # Responsibilities
//! - One frame type for both sides of a relay (axum server sockets and
//!   tokio-tungstenite client sockets)
//! - A handler-facing [`WebSocket`] with accept/receive/send/close
//! - In-memory frame pairs for tests and in-process wiring
//!
//! # Data Flow
//! ```text
//! Client ←── axum socket ──→ FrameStream/FrameSink ←── relay / handler
//! Upstream ←── tungstenite ──→ FrameStream/FrameSink ←── relay
//! ```
//!
//! # Design Decisions
//! - Frames within one socket are strictly FIFO in both directions
//! - Anything that is not text, binary, ping, pong or close surfaces as
//!   [`Frame::Unknown`]; the relay treats it as fatal

use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket as AxumSocket};
use axum::http::header::UPGRADE;
use axum::http::HeaderMap;
use futures_util::stream::BoxStream;
use futures_util::{future, Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::http::request::RequestContext;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Unexpected condition on the server.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Upstream gateway failure.
pub const CLOSE_BAD_GATEWAY: u16 = 1014;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

/// One WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
    /// A frame type this layer does not understand.
    Unknown(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebSocketError {
    #[error("websocket has not been accepted")]
    NotAccepted,

    #[error("websocket is already closed")]
    Closed,

    #[error("peer disconnected")]
    Disconnected(Option<CloseReason>),

    #[error("expected {expected} frame, received {received}")]
    UnexpectedFrame {
        expected: &'static str,
        received: &'static str,
    },

    #[error("frame type `{0}` cannot be sent")]
    Unsendable(&'static str),

    #[error("websocket transport error: {0}")]
    Transport(String),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
            Frame::Ping(_) => "ping",
            Frame::Pong(_) => "pong",
            Frame::Close(_) => "close",
            Frame::Unknown(kind) => kind,
        }
    }

    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Frame::Close(Some(CloseReason {
            code,
            reason: reason.into(),
        }))
    }
}

pub type FrameStream = BoxStream<'static, Result<Frame, WebSocketError>>;
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = WebSocketError> + Send>>;

impl From<AxumMessage> for Frame {
    fn from(message: AxumMessage) -> Self {
        match message {
            AxumMessage::Text(text) => Frame::Text(text.as_str().to_string()),
            AxumMessage::Binary(bytes) => Frame::Binary(bytes),
            AxumMessage::Ping(bytes) => Frame::Ping(bytes),
            AxumMessage::Pong(bytes) => Frame::Pong(bytes),
            AxumMessage::Close(frame) => Frame::Close(frame.map(|f| CloseReason {
                code: f.code,
                reason: f.reason.as_str().to_string(),
            })),
        }
    }
}

impl TryFrom<Frame> for AxumMessage {
    type Error = WebSocketError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        Ok(match frame {
            Frame::Text(text) => AxumMessage::Text(text.into()),
            Frame::Binary(bytes) => AxumMessage::Binary(bytes),
            Frame::Ping(bytes) => AxumMessage::Ping(bytes),
            Frame::Pong(bytes) => AxumMessage::Pong(bytes),
            Frame::Close(reason) => AxumMessage::Close(reason.map(|r| AxumCloseFrame {
                code: r.code,
                reason: r.reason.into(),
            })),
            Frame::Unknown(kind) => return Err(WebSocketError::Unsendable(kind)),
        })
    }
}

impl From<WsMessage> for Frame {
    fn from(message: WsMessage) -> Self {
        match message {
            WsMessage::Text(text) => Frame::Text(text.as_str().to_string()),
            WsMessage::Binary(bytes) => Frame::Binary(bytes),
            WsMessage::Ping(bytes) => Frame::Ping(bytes),
            WsMessage::Pong(bytes) => Frame::Pong(bytes),
            WsMessage::Close(frame) => Frame::Close(frame.map(|f| CloseReason {
                code: u16::from(f.code),
                reason: f.reason.as_str().to_string(),
            })),
            WsMessage::Frame(_) => Frame::Unknown("raw"),
        }
    }
}

impl TryFrom<Frame> for WsMessage {
    type Error = WebSocketError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        Ok(match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(bytes) => WsMessage::Binary(bytes),
            Frame::Ping(bytes) => WsMessage::Ping(bytes),
            Frame::Pong(bytes) => WsMessage::Pong(bytes),
            Frame::Close(reason) => WsMessage::Close(reason.map(|r| WsCloseFrame {
                code: CloseCode::from(r.code),
                reason: r.reason.into(),
            })),
            Frame::Unknown(kind) => return Err(WebSocketError::Unsendable(kind)),
        })
    }
}

/// `Upgrade: websocket` present.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Split an accepted axum socket into frame halves.
pub fn split_axum(socket: AxumSocket) -> (FrameSink, FrameStream) {
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(|e| WebSocketError::Transport(e.to_string()))
        .with(|frame: Frame| future::ready(AxumMessage::try_from(frame)));
    let stream = stream.map(|item| item.map(Frame::from).map_err(|e| WebSocketError::Transport(e.to_string())));
    (Box::pin(sink), stream.boxed())
}

/// Split a tungstenite client connection into frame halves.
pub fn split_tungstenite<S>(socket: tokio_tungstenite::WebSocketStream<S>) -> (FrameSink, FrameStream)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(|e| WebSocketError::Transport(e.to_string()))
        .with(|frame: Frame| future::ready(WsMessage::try_from(frame)));
    let stream = stream.map(|item| item.map(Frame::from).map_err(|e| WebSocketError::Transport(e.to_string())));
    (Box::pin(sink), stream.boxed())
}

/// Two connected in-memory endpoints: frames sent on one side are
/// received on the other.
pub fn frame_pair() -> ((FrameSink, FrameStream), (FrameSink, FrameStream)) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    ((channel_sink(a_tx), channel_stream(b_rx)), (channel_sink(b_tx), channel_stream(a_rx)))
}

fn channel_sink(tx: mpsc::UnboundedSender<Frame>) -> FrameSink {
    Box::pin(futures_util::sink::unfold(tx, |tx, frame: Frame| async move {
        tx.send(frame).map_err(|_| WebSocketError::Disconnected(None))?;
        Ok::<_, WebSocketError>(tx)
    }))
}

fn channel_stream(rx: mpsc::UnboundedReceiver<Frame>) -> FrameStream {
    futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|frame| (Ok(frame), rx)) }).boxed()
}

const PENDING: u8 = 0;
const ACCEPTED: u8 = 1;
const CLOSED: u8 = 2;

/// Shared close handle, kept by the dispatcher while a handler owns the socket.
#[derive(Clone)]
pub(crate) struct SocketCloser {
    sink: Arc<Mutex<FrameSink>>,
    state: Arc<AtomicU8>,
}

impl SocketCloser {
    pub(crate) fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }

    /// Send a close frame unless the socket is already closed.
    pub(crate) async fn close(&self, code: u16, reason: &str) -> Result<(), WebSocketError> {
        if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return Err(WebSocketError::Closed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(Frame::close(code, reason)).await?;
        sink.close().await
    }
}

/// A WebSocket connection as seen by a socket handler.
pub struct WebSocket {
    context: RequestContext,
    stream: FrameStream,
    closer: SocketCloser,
}

impl WebSocket {
    pub fn new(context: RequestContext, sink: FrameSink, stream: FrameStream) -> Self {
        Self {
            context,
            stream,
            closer: SocketCloser {
                sink: Arc::new(Mutex::new(sink)),
                state: Arc::new(AtomicU8::new(PENDING)),
            },
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn is_accepted(&self) -> bool {
        self.closer.state.load(Ordering::Acquire) == ACCEPTED
    }

    /// Accept the connection. Accepting twice is a no-op.
    pub fn accept(&mut self) -> Result<(), WebSocketError> {
        match self
            .closer
            .state
            .compare_exchange(PENDING, ACCEPTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) | Err(ACCEPTED) => Ok(()),
            Err(_) => Err(WebSocketError::Closed),
        }
    }

    fn check_open(&self) -> Result<(), WebSocketError> {
        match self.closer.state.load(Ordering::Acquire) {
            ACCEPTED => Ok(()),
            PENDING => Err(WebSocketError::NotAccepted),
            _ => Err(WebSocketError::Closed),
        }
    }

    /// Next data or close frame. Ping/pong frames are skipped.
    pub async fn receive(&mut self) -> Result<Frame, WebSocketError> {
        self.check_open()?;
        loop {
            match self.stream.next().await {
                Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => continue,
                Some(Ok(frame)) => return Ok(frame),
                Some(Err(e)) => return Err(e),
                None => return Err(WebSocketError::Disconnected(None)),
            }
        }
    }

    /// Next text frame; a close frame becomes `Disconnected`.
    pub async fn receive_text(&mut self) -> Result<String, WebSocketError> {
        match self.receive().await? {
            Frame::Text(text) => Ok(text),
            Frame::Close(reason) => Err(WebSocketError::Disconnected(reason)),
            other => Err(WebSocketError::UnexpectedFrame {
                expected: "text",
                received: other.kind(),
            }),
        }
    }

    pub async fn receive_bytes(&mut self) -> Result<Bytes, WebSocketError> {
        match self.receive().await? {
            Frame::Binary(bytes) => Ok(bytes),
            Frame::Close(reason) => Err(WebSocketError::Disconnected(reason)),
            other => Err(WebSocketError::UnexpectedFrame {
                expected: "binary",
                received: other.kind(),
            }),
        }
    }

    pub async fn send(&mut self, frame: Frame) -> Result<(), WebSocketError> {
        self.check_open()?;
        self.closer.sink.lock().await.send(frame).await
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), WebSocketError> {
        self.send(Frame::Text(text.into())).await
    }

    pub async fn send_bytes(&mut self, bytes: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send(Frame::Binary(bytes.into())).await
    }

    pub async fn send_json<T: serde::Serialize>(&mut self, value: &T) -> Result<(), WebSocketError> {
        let text = serde_json::to_string(value).map_err(|e| WebSocketError::Transport(e.to_string()))?;
        self.send_text(text).await
    }

    /// Close the connection. Closing an already-closed socket is an error.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), WebSocketError> {
        self.closer.close(code, reason).await
    }

    pub(crate) fn closer(&self) -> SocketCloser {
        self.closer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket_pair() -> (WebSocket, FrameSink, FrameStream) {
        let ((sink, stream), (peer_sink, peer_stream)) = frame_pair();
        (WebSocket::new(RequestContext::lifespan(), sink, stream), peer_sink, peer_stream)
    }

    #[tokio::test]
    async fn test_requires_accept() {
        let (mut ws, _peer_sink, _peer_stream) = socket_pair();
        assert_eq!(ws.send_text("x").await, Err(WebSocketError::NotAccepted));
        ws.accept().unwrap();
        ws.accept().unwrap();
        ws.send_text("x").await.unwrap();
    }

    #[tokio::test]
    async fn test_frames_are_fifo() {
        let (mut ws, mut peer_sink, mut peer_stream) = socket_pair();
        ws.accept().unwrap();

        for i in 0..3 {
            peer_sink.send(Frame::Text(format!("m{}", i))).await.unwrap();
        }
        peer_sink.send(Frame::Ping(Bytes::new())).await.unwrap();
        peer_sink.send(Frame::Text("m3".into())).await.unwrap();
        for i in 0..4 {
            let text = ws.receive_text().await.unwrap();
            assert_eq!(text, format!("m{}", i));
            ws.send_text(text).await.unwrap();
        }
        for i in 0..4 {
            assert_eq!(peer_stream.next().await.unwrap().unwrap(), Frame::Text(format!("m{}", i)));
        }
    }

    #[tokio::test]
    async fn test_close_once() {
        let (mut ws, _peer_sink, mut peer_stream) = socket_pair();
        ws.accept().unwrap();
        ws.close(CLOSE_NORMAL, "bye").await.unwrap();
        assert_eq!(ws.close(CLOSE_NORMAL, "").await, Err(WebSocketError::Closed));
        assert_eq!(
            peer_stream.next().await.unwrap().unwrap(),
            Frame::close(CLOSE_NORMAL, "bye")
        );
        assert_eq!(ws.send_text("late").await, Err(WebSocketError::Closed));
    }

    #[tokio::test]
    async fn test_peer_close_is_disconnect() {
        let (mut ws, mut peer_sink, _peer_stream) = socket_pair();
        ws.accept().unwrap();
        peer_sink.send(Frame::close(4000, "done")).await.unwrap();
        assert!(matches!(
            ws.receive_text().await,
            Err(WebSocketError::Disconnected(Some(CloseReason { code: 4000, .. })))
        ));
    }

    #[test]
    fn test_message_conversions() {
        let frame = Frame::from(WsMessage::Text("hi".into()));
        assert_eq!(frame, Frame::Text("hi".into()));
        assert!(AxumMessage::try_from(Frame::Unknown("raw")).is_err());
        let close = WsMessage::try_from(Frame::close(CLOSE_BAD_GATEWAY, "")).unwrap();
        assert_eq!(Frame::from(close), Frame::close(CLOSE_BAD_GATEWAY, ""));
    }
}
