//! The built, immutable application.
//!
//! # Data Flow
//! ```text
//! Request<Body>
//!     → WebSocket upgrade?  resolve_websocket → socket handler | mount
//!     → HTTP:               resolve → mount (forwarded as is)
//!                                   | buffer body → RequestContext
//!                                     → app async chain → route pipeline
//!     → Response (errors converted once, here)
//! ```

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::FromRequestParts;
use axum::http::uri::PathAndQuery;
use axum::http::{Request, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::BoxError;

use crate::app::blueprint::Blueprint;
use crate::app::builder::ApplicationBuilder;
use crate::app::route::{Endpoint, RouteSlot};
use crate::app::Mountable;
use crate::config::AppConfig;
use crate::dispatch::{AsyncDispatcher, SocketHandler, SyncDispatcher};
use crate::error::{DispatchError, RegistrationError};
use crate::http::request::{ProtocolKind, RequestContext};
use crate::http::websocket::{is_upgrade_request, split_axum, WebSocket};
use crate::middleware::Next;
use crate::observability::metrics;
use crate::routing::pattern::PathParams;
use crate::routing::table::{Resolution, RouteInfo, RouteMiss, RouteTable};

/// Metrics label for requests that matched nothing.
const UNMATCHED: &str = "unmatched";

pub struct Application {
    config: Arc<AppConfig>,
    table: Arc<RouteTable<Endpoint>>,
    chain: Next,
    dispatcher: SyncDispatcher,
    builder: ApplicationBuilder,
}

impl Application {
    pub(crate) fn new(
        config: AppConfig,
        table: RouteTable<Endpoint>,
        chain: Next,
        dispatcher: SyncDispatcher,
        builder: ApplicationBuilder,
    ) -> Self {
        Self {
            config: Arc::new(config),
            table: Arc::new(table),
            chain,
            dispatcher,
            builder,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &SyncDispatcher {
        &self.dispatcher
    }

    /// Every compiled route, in resolution order.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.table.routes().map(|r| r.info()).collect()
    }

    pub fn blueprint(&self, name: &str) -> Option<&Blueprint> {
        self.builder.blueprint(name)
    }

    /// Build a fresh application from the same registrations and a new
    /// config. `self` is left untouched.
    pub fn rebuild(&self, config: AppConfig) -> Result<Application, RegistrationError> {
        self.builder.clone().build(config)
    }

    /// Run startup hooks in order. The first failure stops the rest.
    pub async fn run_startup(&self) -> Result<(), BoxError> {
        for hook in &self.builder.startup {
            hook(RequestContext::lifespan()).await?;
        }
        Ok(())
    }

    /// Run every shutdown hook. Failures are logged, not returned.
    pub async fn run_shutdown(&self) {
        for hook in &self.builder.shutdown {
            if let Err(e) = hook(RequestContext::lifespan()).await {
                tracing::warn!(error = %e, "Shutdown hook failed");
            }
        }
    }

    /// Answer one request.
    pub async fn handle(&self, req: Request<Body>) -> Response {
        let started = Instant::now();
        let method = req.method().clone();

        let (endpoint, response) = if is_upgrade_request(req.headers()) {
            self.handle_websocket(req).await
        } else {
            self.handle_http(req).await
        };

        metrics::record_request(&endpoint, &method, response.status(), started);
        response
    }

    async fn handle_http(&self, req: Request<Body>) -> (String, Response) {
        let (endpoint, slot, params) = match self.table.resolve(req.method(), req.uri().path()) {
            Resolution::Matched(m) => {
                let endpoint = m.route.endpoint().to_string();
                match m.route.handler() {
                    Endpoint::Http(next) => (Some(endpoint), RouteSlot::Endpoint(next.clone()), m.params),
                    Endpoint::Mount(mount) => {
                        let mount = Arc::clone(mount);
                        let rest = m.rest.unwrap_or_else(|| "/".to_string());
                        return (endpoint, forward(mount, req, &rest).await);
                    }
                    Endpoint::Socket(_) => (None, RouteSlot::Miss(RouteMiss::NotFound), PathParams::default()),
                }
            }
            Resolution::Miss(miss) => (None, RouteSlot::Miss(miss), PathParams::default()),
        };
        let label = endpoint.clone().unwrap_or_else(|| UNMATCHED.to_string());

        let (parts, body) = req.into_parts();
        let body = match axum::body::to_bytes(body, self.config.listener.max_body_size).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let response = self.error_response(&label, &DispatchError::BodyRead(e.to_string()));
                return (label, response);
            }
        };

        let mut ctx = RequestContext::new(ProtocolKind::Http, parts.method, parts.uri, parts.headers, body);
        ctx.extensions_mut().extend(parts.extensions);
        if let Some(name) = &endpoint {
            ctx.resolved(name, params);
        }
        ctx.extensions_mut().insert(slot);

        let response = match self.chain.run(ctx).await {
            Ok(response) => response,
            Err(e) => self.error_response(&label, &e),
        };
        (label, response)
    }

    async fn handle_websocket(&self, req: Request<Body>) -> (String, Response) {
        let (endpoint, target, params, rest) = match self.table.resolve_websocket(req.uri().path()) {
            Resolution::Matched(m) => (
                m.route.endpoint().to_string(),
                m.route.handler().clone(),
                m.params,
                m.rest,
            ),
            Resolution::Miss(_) => {
                let error = DispatchError::RouteNotFound {
                    method: req.method().clone(),
                    path: req.uri().path().to_string(),
                };
                return (UNMATCHED.to_string(), self.error_response(UNMATCHED, &error));
            }
        };

        let response = match target {
            Endpoint::Socket(handler) => upgrade(req, &endpoint, params, handler).await,
            Endpoint::Mount(mount) => forward(mount, req, rest.as_deref().unwrap_or("/")).await,
            Endpoint::Http(_) => {
                let error = DispatchError::RouteNotFound {
                    method: req.method().clone(),
                    path: req.uri().path().to_string(),
                };
                self.error_response(&endpoint, &error)
            }
        };
        (endpoint, response)
    }

    /// The one place a dispatch error is logged.
    fn error_response(&self, endpoint: &str, error: &DispatchError) -> Response {
        match error {
            DispatchError::RouteNotFound { .. } | DispatchError::MethodNotAllowed { .. } => {
                tracing::debug!(error = %error, "No route");
            }
            DispatchError::BodyRead(_) => {
                tracing::warn!(endpoint = %endpoint, error = %error, "Bad request body");
            }
            _ => {
                tracing::error!(endpoint = %endpoint, error = %error, "Request failed");
            }
        }
        error.to_response(self.config.debug)
    }
}

impl Mountable for Application {
    fn call(self: Arc<Self>, req: Request<Body>) -> BoxFuture<'static, Response> {
        async move { self.handle(req).await }.boxed()
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("routes", &self.table.len())
            .field("workers", &self.dispatcher.workers())
            .field("debug", &self.config.debug)
            .finish()
    }
}

async fn upgrade(req: Request<Body>, endpoint: &str, params: PathParams, handler: SocketHandler) -> Response {
    let (mut parts, _body) = req.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let mut ctx = RequestContext::new(ProtocolKind::WebSocket, parts.method, parts.uri, parts.headers, Bytes::new());
    ctx.resolved(endpoint, params);

    upgrade.on_upgrade(move |socket| async move {
        let (sink, stream) = split_axum(socket);
        AsyncDispatcher
            .dispatch_socket(&handler, WebSocket::new(ctx, sink, stream))
            .await;
    })
}

/// Hand `req` to a mounted app with its path replaced by `rest`.
async fn forward(mount: Arc<dyn Mountable>, req: Request<Body>, rest: &str) -> Response {
    let (mut parts, body) = req.into_parts();
    parts.uri = rewrite_path(&parts.uri, rest);
    mount.call(Request::from_parts(parts, body)).await
}

fn rewrite_path(uri: &Uri, path: &str) -> Uri {
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    let Ok(path_and_query) = path_and_query.parse::<PathAndQuery>() else {
        return uri.clone();
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).unwrap_or_else(|_| uri.clone())
}
