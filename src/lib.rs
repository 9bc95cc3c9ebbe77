//! Dual-mode HTTP/WebSocket dispatch core.
//!
//! Sync (blocking) and async handlers live side by side in one route
//! table. Sync handlers run on a bounded worker pool, async handlers and
//! WebSocket handlers run on the runtime.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server (axum, request id, limits, timeout)
//!                          │
//!                          ▼
//!                     app::Application ──── mount ────▶ sub-app / proxy
//!                          │
//!                          ▼
//!                     app async middleware (wrap-and-call-next)
//!                          │
//!                          ▼
//!                     routing::table (first match in registration order)
//!                      │                      │
//!                      ▼                      ▼
//!            dispatch::blocking        dispatch::nonblocking
//!            (worker pool, sync        (runtime, no thread hop)
//!             before/after/exception)        │
//!                      │                      │
//!                      └────────┬─────────────┘
//!                               ▼
//!                    http::response (reply coercion)
//! ```

// Core subsystems
pub mod app;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod middleware;
pub mod routing;

// Relay
pub mod proxy;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use app::{Application, ApplicationBuilder, Blueprint, BlueprintOptions, Mountable, RouteDef};
pub use config::AppConfig;
pub use dispatch::{async_handler, socket_handler, sync_handler, HandlerResult};
pub use error::{DispatchError, RegistrationError};
pub use http::{HttpServer, Reply, RequestContext, WebSocket};
pub use lifecycle::Shutdown;
pub use middleware::{AsyncMiddleware, Middleware, Next, SyncMiddleware};
pub use proxy::{make_proxy, ReverseProxy};
