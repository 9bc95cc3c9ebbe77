//! Before/after/on-exception middleware for sync endpoints.
//!
//! # Ordering
//! ```text
//! [A, B, C] registered in that order:
//!   A.before → B.before → C.before → handler → C.after → B.after → A.after
//! handler error:
//!   C.on_exception → B.on_exception → A.on_exception (first Some wins)
//! ```
//!
//! The chain is folded once when the application is built and runs
//! entirely on a worker thread. A panic in the handler or in a `before` or
//! `after` hook is caught and treated like a returned error, so exception
//! hooks see it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use axum::response::Response;
use tower::BoxError;

use crate::dispatch::{panic_message, SyncHandler};
use crate::error::DispatchError;
use crate::http::request::RequestContext;
use crate::http::response::{make_response, Reply};

/// Hooks run around a sync handler. Every hook has a pass-through default.
pub trait SyncMiddleware: Send + Sync {
    fn name(&self) -> &str;

    /// Runs before the handler. Returning a reply skips the handler and
    /// every inner middleware; outer `after` hooks still run.
    fn before(&self, _ctx: &mut RequestContext) -> Result<Option<Reply>, BoxError> {
        Ok(None)
    }

    /// Runs after the handler, innermost first.
    fn after(&self, _ctx: &RequestContext, response: Response) -> Result<Response, BoxError> {
        Ok(response)
    }

    /// Offered any error that escaped the handler or a hook. Returning a
    /// reply recovers the request.
    fn on_exception(&self, _ctx: &RequestContext, _error: &DispatchError) -> Option<Reply> {
        None
    }
}

type Layer = Arc<dyn Fn(&mut RequestContext) -> Result<Response, DispatchError> + Send + Sync>;

/// A sync handler wrapped in its middleware, ready to run on a worker.
#[derive(Clone)]
pub struct SyncChain {
    call: Layer,
    middlewares: Vec<Arc<dyn SyncMiddleware>>,
}

impl SyncChain {
    /// Fold `middlewares` (registration order) around `handler`.
    pub fn build(handler: SyncHandler, middlewares: Vec<Arc<dyn SyncMiddleware>>) -> Self {
        let terminal: Layer = Arc::new(move |ctx: &mut RequestContext| {
            let reply = panic::catch_unwind(AssertUnwindSafe(|| handler(&*ctx)))
                .map_err(|payload| DispatchError::Handler(panic_message(payload).into()))?
                .map_err(DispatchError::Handler)?;
            Ok(make_response(reply)?)
        });

        let call = middlewares.iter().rev().fold(terminal, |next, middleware| {
            let middleware = Arc::clone(middleware);
            Arc::new(move |ctx: &mut RequestContext| {
                let short_circuit = guarded(middleware.as_ref(), || middleware.before(&mut *ctx))?;
                let response = match short_circuit {
                    Some(reply) => make_response(reply)?,
                    None => next(&mut *ctx)?,
                };
                guarded(middleware.as_ref(), || middleware.after(&*ctx, response))
            }) as Layer
        });

        Self { call, middlewares }
    }

    /// Run the chain. Errors are offered to the exception hooks, innermost
    /// first; an unrecovered error is returned for the boundary to log.
    pub fn call(&self, ctx: &mut RequestContext) -> Result<Response, DispatchError> {
        let error = match (self.call)(&mut *ctx) {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };

        for middleware in self.middlewares.iter().rev() {
            if let Some(reply) = middleware.on_exception(ctx, &error) {
                tracing::debug!(
                    middleware = %middleware.name(),
                    error = %error,
                    "Exception recovered by middleware"
                );
                return Ok(make_response(reply)?);
            }
        }
        Err(error)
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl fmt::Debug for SyncChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.middlewares.iter().map(|m| m.name()).collect();
        f.debug_struct("SyncChain").field("middlewares", &names).finish()
    }
}

/// Run one hook, turning a panic into that middleware's error.
fn guarded<T>(
    middleware: &dyn SyncMiddleware,
    hook: impl FnOnce() -> Result<T, BoxError>,
) -> Result<T, DispatchError> {
    panic::catch_unwind(AssertUnwindSafe(hook))
        .unwrap_or_else(|payload| Err(panic_message(payload).into()))
        .map_err(|source| middleware_error(middleware, source))
}

fn middleware_error(middleware: &dyn SyncMiddleware, source: BoxError) -> DispatchError {
    DispatchError::Middleware {
        middleware: middleware.name().to_string(),
        source,
    }
}
