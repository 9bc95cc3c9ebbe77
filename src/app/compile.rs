//! Turning registrations into compiled routes.
//!
//! Every HTTP route gets its own pipeline at build time:
//!
//! ```text
//! sync route:  [blueprint async mw] → SyncDispatcher → SyncChain(app sync mw + blueprint sync mw) → handler
//! async route: [blueprint async mw] → AsyncDispatcher → handler
//! ```

use std::sync::Arc;

use crate::app::route::{Endpoint, RouteDef, Target};
use crate::dispatch::{AsyncDispatcher, SyncDispatcher};
use crate::error::RegistrationError;
use crate::middleware::{wrap_all, BlueprintMiddleware, Next, SyncChain, SyncMiddleware};
use crate::routing::converter::ConverterRegistry;
use crate::routing::table::{ExecutionModel, RouteKind, RouteTable};

/// Where a registration lands: blueprint name, URL prefix and middleware.
#[derive(Clone, Default)]
pub(crate) struct Scope {
    pub(crate) name: Option<String>,
    pub(crate) prefix: String,
    pub(crate) middleware: BlueprintMiddleware,
}

impl Scope {
    fn wrap(&self, next: Next) -> Next {
        match &self.middleware {
            BlueprintMiddleware::Async(middlewares) => wrap_all(next, middlewares),
            _ => next,
        }
    }
}

pub(crate) struct RouteCompiler {
    table: RouteTable<Endpoint>,
    sync_middlewares: Vec<Arc<dyn SyncMiddleware>>,
    dispatcher: SyncDispatcher,
}

impl RouteCompiler {
    pub(crate) fn new(
        converters: ConverterRegistry,
        sync_middlewares: Vec<Arc<dyn SyncMiddleware>>,
        dispatcher: SyncDispatcher,
    ) -> Self {
        Self {
            table: RouteTable::new(converters),
            sync_middlewares,
            dispatcher,
        }
    }

    pub(crate) fn add(&mut self, scope: &Scope, def: RouteDef, target: Target) -> Result<String, RegistrationError> {
        let pattern = join_prefix(&scope.prefix, &def.pattern);

        let (kind, model, endpoint) = match target {
            Target::Sync(handler) => {
                let mut middlewares = self.sync_middlewares.clone();
                if let BlueprintMiddleware::Sync(extra) = &scope.middleware {
                    middlewares.extend(extra.iter().cloned());
                }
                let chain = SyncChain::build(handler, middlewares);
                let dispatcher = self.dispatcher.clone();
                let next = Next::new(move |ctx| {
                    let chain = chain.clone();
                    let dispatcher = dispatcher.clone();
                    async move { dispatcher.dispatch(chain, ctx).await }
                });
                (RouteKind::http(def.methods), ExecutionModel::Sync, Endpoint::Http(scope.wrap(next)))
            }
            Target::Async(handler) => {
                let next = Next::new(move |ctx| {
                    let handler = handler.clone();
                    async move { AsyncDispatcher.dispatch(&handler, ctx).await }
                });
                (RouteKind::http(def.methods), ExecutionModel::Async, Endpoint::Http(scope.wrap(next)))
            }
            Target::Socket(handler) => (RouteKind::WebSocket, ExecutionModel::Async, Endpoint::Socket(handler)),
            Target::Mount(mount) => (RouteKind::Mount, ExecutionModel::Async, Endpoint::Mount(mount)),
        };

        let endpoint_name = self
            .table
            .add_scoped(scope.name.as_deref(), &pattern, kind, model, endpoint, def.options)?;
        tracing::debug!(endpoint = %endpoint_name, pattern = %pattern, "Route registered");
        Ok(endpoint_name)
    }

    pub(crate) fn finish(self) -> RouteTable<Endpoint> {
        self.table
    }
}

/// Handle passed to a blueprint's deferred registrations.
pub(crate) struct BlueprintSetup<'a> {
    compiler: &'a mut RouteCompiler,
    scope: Scope,
}

impl<'a> BlueprintSetup<'a> {
    pub(crate) fn new(compiler: &'a mut RouteCompiler, scope: Scope) -> Self {
        Self { compiler, scope }
    }

    pub(crate) fn add(&mut self, def: RouteDef, target: Target) -> Result<(), RegistrationError> {
        self.compiler.add(&self.scope, def, target).map(|_| ())
    }
}

/// `"/api"` + `"/users"` → `"/api/users"`. An empty prefix leaves the rule as is.
pub(crate) fn join_prefix(prefix: &str, rule: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return rule.to_string();
    }
    format!("{}/{}", prefix, rule.trim_start_matches('/'))
}
