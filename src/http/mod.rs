//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, limits, timeout)
//!     → Application::handle
//!     → request.rs (RequestContext: params, query, body)
//!     → handler
//!     → response.rs (reply coercion)
//!     → Send to client
//!
//! WebSocket upgrade
//!     → websocket.rs (frames, accept/receive/send/close)
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{ProtocolKind, RequestContext, X_REQUEST_ID};
pub use response::{make_response, InvalidResponseError, Reply, ReplyBody};
pub use server::HttpServer;
pub use websocket::{Frame, WebSocket, WebSocketError};
