//! Wrap-and-call-next middleware for the async half.
//!
//! Each middleware turns the next handler into a new handler and decides
//! itself whether, when and how often to call it. The list is folded in
//! reverse around the terminal once, at build time, so the first
//! registered middleware is the outermost.
//!
//! Errors returned by `next` pass through a middleware untouched unless it
//! matches on them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::DispatchError;
use crate::http::request::RequestContext;

pub type ResponseFuture = BoxFuture<'static, Result<Response, DispatchError>>;

/// The rest of the chain from a middleware's point of view.
#[derive(Clone)]
pub struct Next(Arc<dyn Fn(RequestContext) -> ResponseFuture + Send + Sync>);

impl Next {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, DispatchError>> + Send + 'static,
    {
        Self(Arc::new(move |ctx| f(ctx).boxed()))
    }

    pub fn run(&self, ctx: RequestContext) -> ResponseFuture {
        (self.0)(ctx)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next")
    }
}

pub trait AsyncMiddleware: Send + Sync {
    fn name(&self) -> &str;

    /// Build the handler that runs in place of `next`.
    fn wrap(&self, next: Next) -> Next;
}

/// Fold `middlewares` (registration order) around `terminal`.
pub fn wrap_all(terminal: Next, middlewares: &[Arc<dyn AsyncMiddleware>]) -> Next {
    middlewares
        .iter()
        .rev()
        .fold(terminal, |next, middleware| middleware.wrap(next))
}

/// Middleware from an async function of `(ctx, next)`.
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn AsyncMiddleware>
where
    F: Fn(RequestContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, DispatchError>> + Send + 'static,
{
    Arc::new(FnMiddleware {
        name: name.into(),
        f: Arc::new(f),
    })
}

struct FnMiddleware<F> {
    name: String,
    f: Arc<F>,
}

impl<F, Fut> AsyncMiddleware for FnMiddleware<F>
where
    F: Fn(RequestContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, DispatchError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn wrap(&self, next: Next) -> Next {
        let f = Arc::clone(&self.f);
        Next::new(move |ctx| f(ctx, next.clone()))
    }
}
