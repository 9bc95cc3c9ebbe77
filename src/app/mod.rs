//! Application assembly.
//!
//! # Data Flow
//! ```text
//! ApplicationBuilder (routes, blueprints, middleware registry, hooks)
//!     → build(AppConfig)
//!         → compile.rs (patterns, per-route pipelines)
//!         → blueprint replay (prefix, scope name, blueprint middleware)
//!         → app async chain around the routing terminal
//!     → Application (immutable; handle() per request)
//!
//! Reload: Application::rebuild(new config) → new Application → swap
//! ```
//!
//! # Design Decisions
//! - Registration is an explicit builder. Nothing global, nothing lazy
//! - The builder is kept inside the built application so a new
//!   configuration can be applied by replaying it
//! - Sub-applications and proxies plug in through [`Mountable`]

pub mod application;
pub mod blueprint;
pub mod builder;
pub(crate) mod compile;
pub mod route;

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use tower::BoxError;

pub use application::Application;
pub use blueprint::{Blueprint, BlueprintOptions};
pub use builder::ApplicationBuilder;
pub use route::RouteDef;

use crate::http::request::RequestContext;

/// Anything that can answer a request below a mount prefix. The request
/// URI has already been rewritten to the remaining path.
pub trait Mountable: Send + Sync {
    fn call(self: Arc<Self>, req: Request<Body>) -> BoxFuture<'static, Response>;
}

/// Startup or shutdown hook. Receives a lifespan context.
pub type LifespanHook = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
