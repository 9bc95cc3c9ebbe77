//! Application builder.
//!
//! # Responsibilities
//! - Collect routes, blueprints, middleware and lifespan hooks in order
//! - Enforce blueprint identity (same instance: no-op, other instance: error)
//! - Compile everything into an immutable [`Application`] for a config
//!
//! # Design Decisions
//! - Registrations are kept, not consumed, so `build` can be replayed
//!   against a new configuration
//! - Config middleware runs outside explicitly added middleware
//! - Every registration error surfaces from `build`, before serving

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use tower::BoxError;

use crate::app::application::Application;
use crate::app::blueprint::{Blueprint, BlueprintOptions};
use crate::app::compile::{BlueprintSetup, RouteCompiler, Scope};
use crate::app::route::{RouteDef, RouteSlot, Target};
use crate::app::{LifespanHook, Mountable};
use crate::config::AppConfig;
use crate::dispatch::{AsyncHandler, SocketHandler, SyncDispatcher, SyncHandler};
use crate::error::{DispatchError, RegistrationError};
use crate::http::request::RequestContext;
use crate::middleware::{
    wrap_all, AsyncMiddleware, BlueprintMiddleware, Middleware, MiddlewareRegistry, Next, SyncMiddleware,
};
use crate::routing::converter::{Converter, ConverterRegistry};
use crate::routing::table::RouteMiss;

#[derive(Clone)]
enum Registration {
    Route(RouteDef, Target),
    Blueprint {
        blueprint: Blueprint,
        options: BlueprintOptions,
    },
}

#[derive(Clone)]
pub struct ApplicationBuilder {
    registrations: Vec<Registration>,
    blueprints: Vec<Blueprint>,
    middleware: MiddlewareRegistry,
    sync_middlewares: Vec<Arc<dyn SyncMiddleware>>,
    async_middlewares: Vec<Arc<dyn AsyncMiddleware>>,
    converters: ConverterRegistry,
    pub(crate) startup: Vec<LifespanHook>,
    pub(crate) shutdown: Vec<LifespanHook>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            blueprints: Vec::new(),
            middleware: MiddlewareRegistry::default(),
            sync_middlewares: Vec::new(),
            async_middlewares: Vec::new(),
            converters: ConverterRegistry::new(),
            startup: Vec::new(),
            shutdown: Vec::new(),
        }
    }

    /// Register a sync route. Returns the handler unchanged.
    pub fn sync_route(&mut self, def: impl Into<RouteDef>, handler: SyncHandler) -> SyncHandler {
        self.registrations
            .push(Registration::Route(def.into(), Target::Sync(handler.clone())));
        handler
    }

    /// Register an async route. Returns the handler unchanged.
    pub fn async_route(&mut self, def: impl Into<RouteDef>, handler: AsyncHandler) -> AsyncHandler {
        self.registrations
            .push(Registration::Route(def.into(), Target::Async(handler.clone())));
        handler
    }

    /// Register a WebSocket route. Returns the handler unchanged.
    pub fn websocket_route(&mut self, def: impl Into<RouteDef>, handler: SocketHandler) -> SocketHandler {
        self.registrations
            .push(Registration::Route(def.into(), Target::Socket(handler.clone())));
        handler
    }

    /// Hand everything below `def`'s pattern to `app`, any method and
    /// protocol. Mounted requests bypass this application's middleware.
    pub fn mount(&mut self, def: impl Into<RouteDef>, app: Arc<dyn Mountable>) {
        self.registrations
            .push(Registration::Route(def.into(), Target::Mount(app)));
    }

    /// Register a blueprint. The same instance twice is a no-op; another
    /// instance under a name already taken is an identity conflict.
    pub fn register_blueprint(
        &mut self,
        blueprint: &Blueprint,
        options: BlueprintOptions,
    ) -> Result<(), RegistrationError> {
        if let Some(existing) = self.blueprints.iter().find(|b| b.name() == blueprint.name()) {
            if existing.same_as(blueprint) {
                tracing::debug!(blueprint = %blueprint.name(), "Blueprint already registered, skipping");
                return Ok(());
            }
            return Err(RegistrationError::BlueprintIdentityConflict {
                name: blueprint.name().to_string(),
            });
        }

        self.blueprints.push(blueprint.clone());
        self.registrations.push(Registration::Blueprint {
            blueprint: blueprint.clone(),
            options,
        });
        Ok(())
    }

    /// Make a middleware available to configuration and blueprints by name.
    pub fn register_middleware(&mut self, name: impl Into<String>, middleware: impl Into<Middleware>) {
        self.middleware.insert(name, middleware.into());
    }

    /// Application-wide sync middleware, after any named in the config.
    pub fn use_sync(&mut self, middleware: Arc<dyn SyncMiddleware>) {
        self.sync_middlewares.push(middleware);
    }

    /// Application-wide async middleware, after any named in the config.
    pub fn use_async(&mut self, middleware: Arc<dyn AsyncMiddleware>) {
        self.async_middlewares.push(middleware);
    }

    /// Add or replace a path converter. Routes compiled afterwards see it.
    pub fn converter(&mut self, name: impl Into<String>, converter: Arc<dyn Converter>) {
        self.converters.register(name, converter);
    }

    pub fn on_startup<F, Fut>(&mut self, hook: F)
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.startup.push(Arc::new(move |ctx| hook(ctx).boxed()));
    }

    pub fn on_shutdown<F, Fut>(&mut self, hook: F)
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.shutdown.push(Arc::new(move |ctx| hook(ctx).boxed()));
    }

    pub fn blueprint(&self, name: &str) -> Option<&Blueprint> {
        self.blueprints.iter().find(|b| b.name() == name)
    }

    /// Compile every registration against `config`.
    pub fn build(self, config: AppConfig) -> Result<Application, RegistrationError> {
        let mut sync_middlewares = self.middleware.resolve_sync(&config.middlewares.sync)?;
        sync_middlewares.extend(self.sync_middlewares.iter().cloned());
        let mut async_middlewares = self.middleware.resolve_async(&config.middlewares.r#async)?;
        async_middlewares.extend(self.async_middlewares.iter().cloned());

        let dispatcher = SyncDispatcher::new(config.workers);
        let mut compiler = RouteCompiler::new(self.converters.clone(), sync_middlewares, dispatcher.clone());
        let root = Scope::default();

        for registration in &self.registrations {
            match registration {
                Registration::Route(def, target) => {
                    compiler.add(&root, def.clone(), target.clone())?;
                }
                Registration::Blueprint { blueprint, options } => {
                    let mut refs = blueprint.middlewares();
                    refs.extend(options.middlewares.iter().cloned());
                    let prefix = options
                        .url_prefix
                        .clone()
                        .or_else(|| blueprint.url_prefix().map(str::to_string))
                        .unwrap_or_default();
                    let scope = Scope {
                        name: Some(blueprint.name().to_string()),
                        prefix,
                        middleware: BlueprintMiddleware::resolve(blueprint.name(), &self.middleware, &refs)?,
                    };
                    let mut setup = BlueprintSetup::new(&mut compiler, scope);
                    blueprint.replay(&mut setup)?;
                }
            }
        }

        let table = compiler.finish();
        let chain = wrap_all(route_terminal(), &async_middlewares);

        if config.debug {
            for route in table.routes() {
                let info = route.info();
                tracing::debug!(
                    endpoint = %info.endpoint,
                    template = %info.template,
                    methods = ?info.methods,
                    kind = info.kind,
                    "Route"
                );
            }
        }
        tracing::info!(
            routes = table.len(),
            blueprints = self.blueprints.len(),
            workers = dispatcher.workers(),
            "Application built"
        );

        Ok(Application::new(config, table, chain, dispatcher, self))
    }
}

/// Innermost step of the app async chain: run the route picked by
/// `Application::handle`, or turn the miss into an error.
fn route_terminal() -> Next {
    Next::new(|mut ctx: RequestContext| async move {
        match ctx.extensions_mut().remove::<RouteSlot>() {
            Some(RouteSlot::Endpoint(next)) => next.run(ctx).await,
            Some(RouteSlot::Miss(RouteMiss::MethodNotAllowed { allowed })) => Err(DispatchError::MethodNotAllowed {
                method: ctx.method().clone(),
                path: ctx.path().to_string(),
                allowed,
            }),
            _ => Err(DispatchError::RouteNotFound {
                method: ctx.method().clone(),
                path: ctx.path().to_string(),
            }),
        }
    })
}
