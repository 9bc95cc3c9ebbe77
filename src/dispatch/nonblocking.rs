//! Async dispatcher: handlers and socket handlers polled directly on the
//! runtime, no thread hop.

use axum::response::Response;

use crate::dispatch::{AsyncHandler, SocketHandler};
use crate::error::DispatchError;
use crate::http::request::RequestContext;
use crate::http::response::make_response;
use crate::http::websocket::{WebSocket, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL};

#[derive(Debug, Clone, Copy, Default)]
pub struct AsyncDispatcher;

impl AsyncDispatcher {
    pub async fn dispatch(&self, handler: &AsyncHandler, ctx: RequestContext) -> Result<Response, DispatchError> {
        let reply = handler(ctx).await.map_err(DispatchError::Handler)?;
        Ok(make_response(reply)?)
    }

    /// Run a socket handler to completion. A socket the handler left open
    /// is closed normally; a failed handler closes it with 1011.
    pub async fn dispatch_socket(&self, handler: &SocketHandler, socket: WebSocket) {
        let closer = socket.closer();
        let endpoint = socket.context().endpoint().unwrap_or("unknown").to_string();

        let code = match handler(socket).await {
            Ok(()) => CLOSE_NORMAL,
            Err(e) => {
                tracing::error!(endpoint = %endpoint, error = %e, "WebSocket handler failed");
                CLOSE_INTERNAL_ERROR
            }
        };

        if !closer.is_closed() {
            if let Err(e) = closer.close(code, "").await {
                tracing::debug!(endpoint = %endpoint, error = %e, "Close after handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tower::BoxError;

    use crate::dispatch::{async_handler, socket_handler};
    use crate::http::response::Reply;
    use crate::http::websocket::{frame_pair, Frame};

    #[tokio::test]
    async fn test_dispatch_coerces_reply() {
        let handler = async_handler(|ctx: RequestContext| async move {
            Ok(Reply::from((format!("hello {}", ctx.path()), 201u16)))
        });
        let response = AsyncDispatcher
            .dispatch(&handler, RequestContext::lifespan())
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
    }

    #[tokio::test]
    async fn test_handler_error_is_dispatch_error() {
        let handler = async_handler(|_ctx| async { Err::<Reply, BoxError>("nope".into()) });
        let err = AsyncDispatcher
            .dispatch(&handler, RequestContext::lifespan())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
    }

    async fn shout(mut ws: WebSocket) -> Result<(), BoxError> {
        ws.accept()?;
        let text = ws.receive_text().await?;
        ws.send_text(text.to_uppercase()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_socket_left_open_is_closed_normally() {
        let ((sink, stream), (mut peer_sink, mut peer_stream)) = frame_pair();
        let socket = WebSocket::new(RequestContext::lifespan(), sink, stream);
        let handler = socket_handler(shout);

        peer_sink.send(Frame::Text("hi".into())).await.unwrap();
        AsyncDispatcher.dispatch_socket(&handler, socket).await;

        assert_eq!(peer_stream.next().await.unwrap().unwrap(), Frame::Text("HI".into()));
        assert_eq!(
            peer_stream.next().await.unwrap().unwrap(),
            Frame::close(CLOSE_NORMAL, "")
        );
    }

    #[tokio::test]
    async fn test_failed_socket_handler_closes_with_error_code() {
        let ((sink, stream), (_peer_sink, mut peer_stream)) = frame_pair();
        let socket = WebSocket::new(RequestContext::lifespan(), sink, stream);
        let handler = socket_handler(|_ws: WebSocket| async { Err::<(), BoxError>("bad".into()) });

        AsyncDispatcher.dispatch_socket(&handler, socket).await;
        assert_eq!(
            peer_stream.next().await.unwrap().unwrap(),
            Frame::close(CLOSE_INTERNAL_ERROR, "")
        );
    }
}
