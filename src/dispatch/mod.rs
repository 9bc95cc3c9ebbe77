//! Dispatch subsystem: running handlers under both execution models.
//!
//! # Data Flow
//! ```text
//! resolved sync route
//!     → blocking.rs (semaphore permit → spawn_blocking → sync chain → handler)
//! resolved async route
//!     → nonblocking.rs (handler future polled on the runtime)
//! resolved socket route
//!     → nonblocking.rs (socket handler, then close if still open)
//! ```
//!
//! # Design Decisions
//! - Sync handlers never run on a runtime thread
//! - The worker pool is bounded by `workers` permits, not by thread count
//! - Both models produce replies that go through the same coercion

pub mod blocking;
pub mod nonblocking;

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::BoxError;

pub use blocking::SyncDispatcher;
pub use nonblocking::AsyncDispatcher;

use crate::http::request::RequestContext;
use crate::http::response::Reply;
use crate::http::websocket::WebSocket;

/// What every HTTP handler returns.
pub type HandlerResult = Result<Reply, BoxError>;

/// A blocking handler, run on the worker pool.
pub type SyncHandler = Arc<dyn Fn(&RequestContext) -> HandlerResult + Send + Sync>;

/// A non-blocking handler, run on the runtime.
pub type AsyncHandler = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A WebSocket handler. Owns the socket for the connection's lifetime.
pub type SocketHandler = Arc<dyn Fn(WebSocket) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

pub fn sync_handler<F>(f: F) -> SyncHandler
where
    F: Fn(&RequestContext) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn async_handler<F, Fut>(f: F) -> AsyncHandler
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

pub fn socket_handler<F, Fut>(f: F) -> SocketHandler
where
    F: Fn(WebSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |socket| f(socket).boxed())
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
