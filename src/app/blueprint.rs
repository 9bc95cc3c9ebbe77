//! Blueprints: named, prefixable bundles of routes.
//!
//! A blueprint records registrations as deferred closures. Nothing is
//! compiled until the application is built; then every closure is replayed
//! exactly once against the route compiler with the blueprint's prefix,
//! name and middleware applied.
//!
//! Identity is the instance: clones share it. Registering the same
//! instance twice is a no-op, a different instance under a taken name is
//! a conflict.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::app::builder::ApplicationBuilder;
use crate::app::compile::BlueprintSetup;
use crate::app::route::{RouteDef, Target};
use crate::app::Mountable;
use crate::dispatch::{AsyncHandler, SocketHandler, SyncHandler};
use crate::error::RegistrationError;
use crate::middleware::MiddlewareRef;

type Deferred = Arc<dyn Fn(&mut BlueprintSetup<'_>) -> Result<(), RegistrationError> + Send + Sync>;

fn defer_with<F>(f: F) -> Deferred
where
    F: Fn(&mut BlueprintSetup<'_>) -> Result<(), RegistrationError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Clone)]
pub struct Blueprint {
    inner: Arc<BlueprintInner>,
}

struct BlueprintInner {
    name: String,
    url_prefix: Option<String>,
    deferred: Mutex<Vec<Deferred>>,
    middlewares: Mutex<Vec<MiddlewareRef>>,
}

/// Options given when registering a blueprint.
#[derive(Clone, Default)]
pub struct BlueprintOptions {
    pub(crate) url_prefix: Option<String>,
    pub(crate) middlewares: Vec<MiddlewareRef>,
}

impl BlueprintOptions {
    /// Overrides the blueprint's own prefix.
    pub fn prefix(mut self, url_prefix: impl Into<String>) -> Self {
        self.url_prefix = Some(url_prefix.into());
        self
    }

    /// Appended after the blueprint's own middleware.
    pub fn middleware(mut self, middleware: impl Into<MiddlewareRef>) -> Self {
        self.middlewares.push(middleware.into());
        self
    }
}

impl Blueprint {
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    pub fn with_prefix(name: impl Into<String>, url_prefix: impl Into<String>) -> Self {
        Self::build(name.into(), Some(url_prefix.into()))
    }

    fn build(name: String, url_prefix: Option<String>) -> Self {
        Self {
            inner: Arc::new(BlueprintInner {
                name,
                url_prefix,
                deferred: Mutex::new(Vec::new()),
                middlewares: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn url_prefix(&self) -> Option<&str> {
        self.inner.url_prefix.as_deref()
    }

    /// Same instance (or a clone of it).
    pub fn same_as(&self, other: &Blueprint) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Add blueprint-wide middleware. All of it must be one kind.
    pub fn middleware(&self, middleware: impl Into<MiddlewareRef>) {
        self.inner
            .middlewares
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(middleware.into());
    }

    /// Register a sync route. Returns the handler unchanged.
    pub fn sync_route(&self, def: impl Into<RouteDef>, handler: SyncHandler) -> SyncHandler {
        self.defer(def.into(), Target::Sync(handler.clone()));
        handler
    }

    /// Register an async route. Returns the handler unchanged.
    pub fn async_route(&self, def: impl Into<RouteDef>, handler: AsyncHandler) -> AsyncHandler {
        self.defer(def.into(), Target::Async(handler.clone()));
        handler
    }

    /// Register a WebSocket route. Returns the handler unchanged.
    pub fn websocket_route(&self, def: impl Into<RouteDef>, handler: SocketHandler) -> SocketHandler {
        self.defer(def.into(), Target::Socket(handler.clone()));
        handler
    }

    pub fn mount(&self, def: impl Into<RouteDef>, app: Arc<dyn Mountable>) {
        self.defer(def.into(), Target::Mount(app));
    }

    /// Register into `app`; same as [`ApplicationBuilder::register_blueprint`].
    pub fn register(&self, app: &mut ApplicationBuilder, options: BlueprintOptions) -> Result<(), RegistrationError> {
        app.register_blueprint(self, options)
    }

    fn defer(&self, def: RouteDef, target: Target) {
        let deferred = defer_with(move |setup| setup.add(def.clone(), target.clone()));
        self.inner
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(deferred);
    }

    pub(crate) fn middlewares(&self) -> Vec<MiddlewareRef> {
        self.inner
            .middlewares
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replay every deferred registration once.
    pub(crate) fn replay(&self, setup: &mut BlueprintSetup<'_>) -> Result<(), RegistrationError> {
        let deferred = self
            .inner
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for register in deferred {
            register(&mut *setup)?;
        }
        Ok(())
    }

    pub(crate) fn pending(&self) -> usize {
        self.inner
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blueprint")
            .field("name", &self.inner.name)
            .field("url_prefix", &self.inner.url_prefix)
            .field("routes", &self.pending())
            .finish()
    }
}
