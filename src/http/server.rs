//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the application as its only handler
//! - Wire up host layers (tracing, limits, request ID, timeout)
//! - Bind server to listener, serve until shutdown
//! - Swap in rebuilt applications when the configuration changes
//! - Run lifespan hooks around the serve loop

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::BoxError;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::app::Application;
use crate::config::AppConfig;
use crate::error::RegistrationError;
use crate::lifecycle::Shutdown;

type LiveApp = Arc<ArcSwap<Application>>;

/// HTTP host for an [`Application`].
pub struct HttpServer {
    app: LiveApp,
    router: Router,
}

impl HttpServer {
    /// Listener limits and timeouts are taken from `app`'s config and fixed
    /// for the server's lifetime.
    pub fn new(app: Application) -> Self {
        let config = app.config().clone();
        let app: LiveApp = Arc::new(ArcSwap::from_pointee(app));
        let router = Self::build_router(&config, Arc::clone(&app));
        Self { app, router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &AppConfig, app: LiveApp) -> Router {
        Router::new()
            .fallback(entry)
            .with_state(app)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// The application currently serving requests.
    pub fn application(&self) -> Arc<Application> {
        self.app.load_full()
    }

    /// Rebuild the live application with `config` and swap it in. On error
    /// the current application keeps serving.
    pub fn reload(&self, config: AppConfig) -> Result<(), RegistrationError> {
        apply_config(&self.app, config)
    }

    /// Run startup hooks, serve until `shutdown` fires, then run shutdown
    /// hooks. Configurations arriving on `config_updates` are applied
    /// while serving.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<AppConfig>,
        shutdown: Shutdown,
    ) -> Result<(), BoxError> {
        let addr = listener.local_addr()?;

        self.application().run_startup().await?;

        let live = Arc::clone(&self.app);
        let reload = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                if let Err(e) = apply_config(&live, config) {
                    tracing::error!(error = %e, "Rebuild failed, keeping current application");
                }
            }
        });

        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        reload.abort();
        self.application().run_shutdown().await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn apply_config(live: &LiveApp, config: AppConfig) -> Result<(), RegistrationError> {
    let next = live.load().rebuild(config)?;
    tracing::info!(routes = next.routes().len(), "Application rebuilt");
    live.store(Arc::new(next));
    Ok(())
}

/// Single handler behind the router: hand everything to the live app.
async fn entry(State(app): State<LiveApp>, req: Request<Body>) -> Response {
    let app = app.load_full();
    app.handle(req).await
}
