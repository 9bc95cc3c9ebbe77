//! Route definitions as handed to the builder and blueprints.

use std::sync::Arc;

use axum::http::Method;

use crate::app::Mountable;
use crate::dispatch::{AsyncHandler, SocketHandler, SyncHandler};
use crate::middleware::Next;
use crate::routing::table::{RouteMetadata, RouteMiss, RouteOptions};

/// Pattern, methods and options for one route.
#[derive(Debug, Clone)]
pub struct RouteDef {
    pub(crate) pattern: String,
    pub(crate) methods: Vec<Method>,
    pub(crate) options: RouteOptions,
}

impl RouteDef {
    /// A `GET` route for `pattern`.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            methods: Vec::new(),
            options: RouteOptions::default(),
        }
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods.extend(methods);
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    /// Endpoint name, without the `sync.`/`async.` namespace.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Replace an earlier route with the same pattern and method.
    pub fn replace(mut self) -> Self {
        self.options.replace = true;
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.options.metadata.summary = Some(summary.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.options.metadata.tags.push(tag.into());
        self
    }

    pub fn annotate(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.metadata.annotations.insert(key.into(), value);
        self
    }

    pub fn metadata(mut self, metadata: RouteMetadata) -> Self {
        self.options.metadata = metadata;
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl From<&str> for RouteDef {
    fn from(pattern: &str) -> Self {
        RouteDef::new(pattern)
    }
}

impl From<String> for RouteDef {
    fn from(pattern: String) -> Self {
        RouteDef::new(pattern)
    }
}

/// What a registration points at, before compilation.
#[derive(Clone)]
pub(crate) enum Target {
    Sync(SyncHandler),
    Async(AsyncHandler),
    Socket(SocketHandler),
    Mount(Arc<dyn Mountable>),
}

/// What a compiled route points at.
#[derive(Clone)]
pub(crate) enum Endpoint {
    /// Per-route pipeline: blueprint async middleware, then the dispatcher.
    Http(Next),
    Socket(SocketHandler),
    Mount(Arc<dyn Mountable>),
}

/// Routing outcome handed from `Application::handle` to the chain terminal.
#[derive(Clone)]
pub(crate) enum RouteSlot {
    Endpoint(Next),
    Miss(RouteMiss),
}
