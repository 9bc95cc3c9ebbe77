//! End-to-end dispatch through the host server.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tower::{BoxError, ServiceExt};

use dualmode::middleware::from_fn;
use dualmode::{
    async_handler, socket_handler, sync_handler, ApplicationBuilder, Blueprint, BlueprintOptions,
    DispatchError, HttpServer, Next, Reply, RequestContext, RouteDef, SyncMiddleware, WebSocket,
};

use common::{serve, test_config, within};

async fn call(server: &HttpServer, method: Method, uri: &str, body: &'static str) -> (StatusCode, HeaderMap, Bytes) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body))
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

async fn get(server: &HttpServer, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
    call(server, Method::GET, uri, "").await
}

fn json_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

type Log = Arc<Mutex<Vec<String>>>;

/// Logs every hook it runs; recovers errors when `recover` is set.
struct Recorder {
    label: &'static str,
    log: Log,
    recover: bool,
}

impl SyncMiddleware for Recorder {
    fn name(&self) -> &str {
        self.label
    }

    fn before(&self, _ctx: &mut RequestContext) -> Result<Option<Reply>, BoxError> {
        self.log.lock().unwrap().push(format!("before:{}", self.label));
        Ok(None)
    }

    fn after(&self, _ctx: &RequestContext, response: Response) -> Result<Response, BoxError> {
        self.log.lock().unwrap().push(format!("after:{}", self.label));
        Ok(response)
    }

    fn on_exception(&self, _ctx: &RequestContext, _error: &DispatchError) -> Option<Reply> {
        self.log.lock().unwrap().push(format!("exception:{}", self.label));
        self.recover.then(|| Reply::from(("recovered", 503u16)))
    }
}

fn recorder(label: &'static str, log: &Log, recover: bool) -> Arc<dyn SyncMiddleware> {
    Arc::new(Recorder {
        label,
        log: Arc::clone(log),
        recover,
    })
}

#[tokio::test]
async fn test_sync_and_async_routes_share_one_table() {
    let mut app = ApplicationBuilder::new();
    app.sync_route(RouteDef::new("/sync"), sync_handler(|_ctx| Ok(Reply::from("from sync"))));
    app.async_route(
        RouteDef::new("/async"),
        async_handler(|_ctx: RequestContext| async { Ok(Reply::from("from async")) }),
    );
    let server = HttpServer::new(app.build(test_config()).unwrap());

    let (status, _, body) = get(&server, "/sync").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "from sync");

    let (status, _, body) = get(&server, "/async").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "from async");

    let (status, _, _) = get(&server, "/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_typed_parameters_and_query() {
    let mut app = ApplicationBuilder::new();
    app.sync_route(
        RouteDef::new("/items/<int:id>/<path:rest>"),
        sync_handler(|ctx| {
            let id = ctx.params().get_int("id").ok_or("missing id")?;
            let rest = ctx.param("rest").map(|p| p.to_string()).unwrap_or_default();
            Ok(Reply::from(json!({
                "id": id,
                "rest": rest,
                "page": ctx.query_param("page"),
            })))
        }),
    );
    let server = HttpServer::new(app.build(test_config()).unwrap());

    let (status, headers, body) = get(&server, "/items/12/a/b?page=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(json_body(&body), json!({ "id": 12, "rest": "a/b", "page": "3" }));

    let (status, _, _) = get(&server, "/items/twelve/a").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reply_shapes_are_coerced() {
    let mut app = ApplicationBuilder::new();
    app.sync_route(RouteDef::new("/status"), sync_handler(|_ctx| Ok(Reply::from(("gone", 410u16)))));
    app.sync_route(
        RouteDef::new("/headers"),
        sync_handler(|_ctx| Ok(Reply::from(("tagged", [("x-tag", "blue")])))),
    );
    app.sync_route(
        RouteDef::new("/triple"),
        sync_handler(|_ctx| Ok(Reply::from(("made", 201u16, [("location", "/things/1")])))),
    );
    app.async_route(
        RouteDef::new("/empty"),
        async_handler(|_ctx: RequestContext| async { Ok(Reply::none()) }),
    );
    let server = HttpServer::new(app.build(test_config()).unwrap());

    let (status, _, body) = get(&server, "/status").await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body, "gone");

    let (status, headers, _) = get(&server, "/headers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-tag"], "blue");

    let (status, headers, _) = get(&server, "/triple").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers["location"], "/things/1");

    let (status, _, _) = get(&server, "/empty").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_sync_middleware_runs_in_registration_order() {
    let log: Log = Arc::default();
    let mut app = ApplicationBuilder::new();
    app.use_sync(recorder("a", &log, false));
    app.use_sync(recorder("b", &log, false));

    let handler_log = Arc::clone(&log);
    app.sync_route(
        RouteDef::new("/"),
        sync_handler(move |_ctx| {
            handler_log.lock().unwrap().push("handler".to_string());
            Ok(Reply::from("ok"))
        }),
    );
    let server = HttpServer::new(app.build(test_config()).unwrap());

    let (status, _, _) = get(&server, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["before:a", "before:b", "handler", "after:b", "after:a"]
    );
}

#[tokio::test]
async fn test_exception_hooks_run_innermost_first_until_recovered() {
    let log: Log = Arc::default();
    let mut app = ApplicationBuilder::new();
    app.use_sync(recorder("a", &log, false));
    app.use_sync(recorder("b", &log, true));
    app.use_sync(recorder("c", &log, false));
    app.sync_route(RouteDef::new("/"), sync_handler(|_ctx| Err("boom".into())));
    let server = HttpServer::new(app.build(test_config()).unwrap());

    let (status, _, body) = get(&server, "/").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "recovered");

    let log = log.lock().unwrap();
    let hooks: Vec<&str> = log
        .iter()
        .filter(|entry| entry.starts_with("exception:"))
        .map(String::as_str)
        .collect();
    assert_eq!(hooks, vec!["exception:c", "exception:b"]);
}

#[tokio::test]
async fn test_sync_middleware_skips_async_routes() {
    let log: Log = Arc::default();
    let mut app = ApplicationBuilder::new();
    app.use_sync(recorder("a", &log, false));
    app.async_route(
        RouteDef::new("/"),
        async_handler(|_ctx: RequestContext| async { Ok(Reply::from("ok")) }),
    );
    let server = HttpServer::new(app.build(test_config()).unwrap());

    let (status, _, _) = get(&server, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_async_middleware_wraps_both_kinds() {
    let mut app = ApplicationBuilder::new();
    app.use_async(from_fn("stamp", |ctx: RequestContext, next: Next| async move {
        let mut response = next.run(ctx).await?;
        response
            .headers_mut()
            .insert("x-stamp", "yes".parse().unwrap());
        Ok::<_, DispatchError>(response)
    }));
    app.sync_route(RouteDef::new("/sync"), sync_handler(|_ctx| Ok(Reply::from("s"))));
    app.async_route(
        RouteDef::new("/async"),
        async_handler(|_ctx: RequestContext| async { Ok(Reply::from("a")) }),
    );
    let server = HttpServer::new(app.build(test_config()).unwrap());

    for path in ["/sync", "/async"] {
        let (status, headers, _) = get(&server, path).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-stamp"], "yes");
    }
}

#[tokio::test]
async fn test_async_middleware_can_answer_without_calling_next() {
    let mut app = ApplicationBuilder::new();
    app.use_async(from_fn("gate", |ctx: RequestContext, next: Next| async move {
        if ctx.header("x-token").is_none() {
            return Ok((StatusCode::UNAUTHORIZED, "no token").into_response());
        }
        next.run(ctx).await
    }));
    app.sync_route(RouteDef::new("/"), sync_handler(|_ctx| Ok(Reply::from("secret"))));
    let server = HttpServer::new(app.build(test_config()).unwrap());

    let (status, _, body) = get(&server, "/").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "no token");

    let request = Request::builder()
        .uri("/")
        .header("x-token", "t")
        .body(Body::empty())
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_blueprint_routes_are_prefixed_and_named() {
    let users = Blueprint::with_prefix("users", "/users");
    users.sync_route(
        RouteDef::new("/<int:id>").name("show"),
        sync_handler(|ctx| Ok(Reply::from(format!("{:?}", ctx.endpoint())))),
    );

    let mut app = ApplicationBuilder::new();
    app.register_blueprint(&users, BlueprintOptions::default().prefix("/v2/users"))
        .unwrap();
    let server = HttpServer::new(app.build(test_config()).unwrap());

    let (status, _, body) = get(&server, "/v2/users/5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Some(\"sync.users.show\")");

    let (status, _, _) = get(&server, "/users/5").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_sync_handler_does_not_stall_async_routes() {
    let mut config = test_config();
    config.workers = 1;

    let mut app = ApplicationBuilder::new();
    app.sync_route(
        RouteDef::new("/slow"),
        sync_handler(|_ctx| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Reply::from("slow"))
        }),
    );
    app.async_route(
        RouteDef::new("/fast"),
        async_handler(|_ctx: RequestContext| async { Ok(Reply::from("fast")) }),
    );
    let server = Arc::new(HttpServer::new(app.build(config).unwrap()));

    let slow_server = Arc::clone(&server);
    let slow = tokio::spawn(async move { get(&slow_server, "/slow").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, _, body) = get(&server, "/fast").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "fast");
    assert!(!slow.is_finished());

    let (status, _, body) = slow.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "slow");
}

#[tokio::test]
async fn test_handler_error_hides_details_outside_debug() {
    let mut app = ApplicationBuilder::new();
    app.sync_route(RouteDef::new("/"), sync_handler(|_ctx| Err("secret failure".into())));
    let server = HttpServer::new(app.build(test_config()).unwrap());

    let (status, _, body) = get(&server, "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!String::from_utf8_lossy(&body).contains("secret failure"));
}

#[tokio::test]
async fn test_served_echo_over_tcp() {
    let mut app = ApplicationBuilder::new();
    app.sync_route(
        RouteDef::new("/echo").method(Method::POST),
        sync_handler(|ctx| Ok(Reply::from(ctx.body().clone()))),
    );
    let server = serve(app.build(test_config()).unwrap()).await;

    let response = reqwest::Client::new()
        .post(server.url("/echo"))
        .body("ping")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "ping");
}

#[tokio::test]
async fn test_websocket_route_echoes_until_close() {
    let mut app = ApplicationBuilder::new();
    app.websocket_route(
        RouteDef::new("/ws/<name>"),
        socket_handler(|mut socket: WebSocket| async move {
            socket.accept()?;
            let name = socket
                .context()
                .param("name")
                .map(|p| p.to_string())
                .unwrap_or_default();
            let text = socket.receive_text().await?;
            socket.send_text(format!("{}: {}", name, text)).await?;
            Ok::<(), BoxError>(())
        }),
    );
    let server = serve(app.build(test_config()).unwrap()).await;

    let (mut ws, _) = within(tokio_tungstenite::connect_async(server.ws_url("/ws/amy")))
        .await
        .unwrap();
    ws.send(Message::text("hello")).await.unwrap();

    let reply = within(ws.next()).await.unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "amy: hello");

    // Handler returned, so the server closes normally.
    match within(ws.next()).await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1000),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_websocket_to_http_route_is_not_found() {
    let mut app = ApplicationBuilder::new();
    app.sync_route(RouteDef::new("/plain"), sync_handler(|_ctx| Ok(Reply::from("ok"))));
    let server = serve(app.build(test_config()).unwrap()).await;

    let result = within(tokio_tungstenite::connect_async(server.ws_url("/plain"))).await;
    assert!(result.is_err());
}
