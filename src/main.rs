//! dualmode demo server.
//!
//! Serves a small application that exercises both execution models plus
//! every reverse proxy mount from the configuration.
//!
//! ```text
//! GET  /                     sync, JSON service info
//! GET  /user/<int:id>        sync, typed path parameter
//! GET  /sleep/<float:secs>   async, non-blocking sleep
//! POST /echo                 sync, echoes the request body
//! WS   /ws/echo              async socket, echoes frames
//! GET  /api/time             blueprint route (async middleware)
//! *    <proxies[].path>/...  relayed to <proxies[].upstream>
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::http::header::SERVER;
use axum::http::{HeaderValue, Method};
use axum::response::Response;
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::BoxError;

use dualmode::app::{ApplicationBuilder, Blueprint, BlueprintOptions, RouteDef};
use dualmode::config::{load_config, AppConfig, ConfigWatcher};
use dualmode::dispatch::{async_handler, socket_handler, sync_handler};
use dualmode::error::DispatchError;
use dualmode::http::websocket::{Frame, WebSocketError};
use dualmode::http::{HttpServer, Reply, RequestContext, WebSocket};
use dualmode::lifecycle::{shutdown_on_ctrl_c, Shutdown};
use dualmode::middleware::{from_fn, Next, SyncMiddleware};
use dualmode::observability::{logging, metrics};
use dualmode::proxy::make_proxy;

#[derive(Debug, Clone, Parser)]
#[command(name = "dualmode", version, about = "Dual-mode HTTP/WebSocket dispatch server")]
struct Cli {
    /// Configuration file (TOML, or JSON with a `.json` extension). Watched
    /// for changes.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address, overrides `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Sync worker pool size, overrides `workers`.
    #[arg(long)]
    workers: Option<usize>,

    /// Enable debug mode.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// Flags win over the file.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.debug {
            config.debug = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    cli.apply(&mut config);

    logging::init(&config.observability.log_level);
    tracing::info!("dualmode v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = demo_application(&config)?.build(config.clone())?;

    tracing::info!(
        bind_address = %config.listener.bind_address,
        workers = config.workers,
        routes = app.routes().len(),
        debug = config.debug,
        "Configuration loaded"
    );

    // Reloads go through the same flag overrides as the initial load.
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut file_updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let cli = cli.clone();
            tokio::spawn(async move {
                while let Some(mut config) = file_updates.recv().await {
                    cli.apply(&mut config);
                    if updates_tx.send(config).is_err() {
                        break;
                    }
                }
            });
            Some(watcher)
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    HttpServer::new(app).run(listener, updates_rx, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Request start, stashed by [`Timing`].
#[derive(Clone, Copy)]
struct Started(Instant);

/// Adds `x-elapsed-ms` to sync responses.
struct Timing;

impl SyncMiddleware for Timing {
    fn name(&self) -> &str {
        "timing"
    }

    fn before(&self, ctx: &mut RequestContext) -> Result<Option<Reply>, BoxError> {
        ctx.extensions_mut().insert(Started(Instant::now()));
        Ok(None)
    }

    fn after(&self, ctx: &RequestContext, mut response: Response) -> Result<Response, BoxError> {
        if let Some(Started(started)) = ctx.extensions().get::<Started>() {
            let elapsed = started.elapsed().as_millis().to_string();
            response.headers_mut().insert("x-elapsed-ms", HeaderValue::from_str(&elapsed)?);
        }
        Ok(response)
    }
}

fn demo_application(config: &AppConfig) -> Result<ApplicationBuilder, BoxError> {
    let mut app = ApplicationBuilder::new();

    app.register_middleware("timing", Arc::new(Timing) as Arc<dyn SyncMiddleware>);
    app.register_middleware(
        "server-header",
        from_fn("server-header", |ctx, next: Next| async move {
            let mut response = next.run(ctx).await?;
            response
                .headers_mut()
                .insert(SERVER, HeaderValue::from_static("dualmode"));
            Ok::<_, DispatchError>(response)
        }),
    );

    app.sync_route(
        RouteDef::new("/").name("index").summary("Service info"),
        sync_handler(|_ctx| {
            Ok(Reply::from(json!({
                "service": "dualmode",
                "version": env!("CARGO_PKG_VERSION"),
            })))
        }),
    );

    app.sync_route(
        RouteDef::new("/user/<int:id>").name("user").tag("users"),
        sync_handler(|ctx| {
            let id = ctx.params().get_int("id").ok_or("missing id")?;
            Ok(Reply::from(json!({ "id": id, "name": format!("user-{}", id) })))
        }),
    );

    app.async_route(
        RouteDef::new("/sleep/<float:secs>").name("sleep"),
        async_handler(|ctx: RequestContext| async move {
            let secs = ctx
                .param("secs")
                .and_then(|p| p.as_float())
                .unwrap_or(0.0)
                .clamp(0.0, 5.0);
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            Ok(Reply::from(format!("slept {}s", secs)))
        }),
    );

    app.sync_route(
        RouteDef::new("/echo").method(Method::POST).name("echo"),
        sync_handler(|ctx| Ok(Reply::from(ctx.body().clone()))),
    );

    app.websocket_route(
        RouteDef::new("/ws/echo").name("echo"),
        socket_handler(|mut socket: WebSocket| async move {
            socket.accept()?;
            loop {
                match socket.receive().await {
                    Ok(Frame::Text(text)) => socket.send_text(text).await?,
                    Ok(Frame::Binary(bytes)) => socket.send_bytes(bytes).await?,
                    Ok(Frame::Close(_)) | Err(WebSocketError::Disconnected(_)) => break,
                    Ok(_) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok::<(), BoxError>(())
        }),
    );

    let api = Blueprint::with_prefix("api", "/api");
    api.async_route(
        RouteDef::new("/time").name("time"),
        async_handler(|_ctx: RequestContext| async move {
            let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
            Ok::<_, BoxError>(Reply::from(json!({ "unix": now })))
        }),
    );
    api.middleware("server-header");
    app.register_blueprint(&api, BlueprintOptions::default())?;

    for mount in &config.proxies {
        let proxy = make_proxy(&mount.upstream)?;
        tracing::info!(path = %mount.path, upstream = %mount.upstream, "Proxy mounted");
        app.mount(RouteDef::new(mount.path.clone()), Arc::new(proxy));
    }

    app.on_startup(|_ctx: RequestContext| async move {
        tracing::info!("Application ready");
        Ok::<(), BoxError>(())
    });
    app.on_shutdown(|_ctx: RequestContext| async move {
        tracing::info!("Application stopping");
        Ok::<(), BoxError>(())
    });

    Ok(app)
}
