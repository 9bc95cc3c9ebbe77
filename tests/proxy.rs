//! Reverse proxy mounts against a live mock upstream.

mod common;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use dualmode::{make_proxy, sync_handler, Application, ApplicationBuilder, Reply, RouteDef};

use common::{serve, start_mock_upstream, test_config, unused_addr, within};

fn proxied_app(mount: &str, upstream: &str) -> Application {
    let mut app = ApplicationBuilder::new();
    app.sync_route(RouteDef::new("/local"), sync_handler(|_ctx| Ok(Reply::from("local"))));
    app.mount(RouteDef::new(mount), Arc::new(make_proxy(upstream).unwrap()));
    app.build(test_config()).unwrap()
}

#[tokio::test]
async fn test_http_request_is_relayed_with_host_rewritten() {
    let upstream = start_mock_upstream().await;
    let server = serve(proxied_app("/up", &format!("http://{}", upstream))).await;

    let response = reqwest::Client::new()
        .post(server.url("/up/things/7?sort=asc"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let seen: Value = response.json().await.unwrap();
    assert_eq!(seen["method"], "POST");
    assert_eq!(seen["path"], "/things/7");
    assert_eq!(seen["query"], "sort=asc");
    assert_eq!(seen["host"], upstream.to_string());
}

#[tokio::test]
async fn test_upstream_base_path_is_prepended() {
    let upstream = start_mock_upstream().await;
    let server = serve(proxied_app("/up", &format!("http://{}/base/", upstream))).await;

    let seen: Value = reqwest::get(server.url("/up/x")).await.unwrap().json().await.unwrap();
    assert_eq!(seen["path"], "/base/x");
    assert_eq!(seen["query"], Value::Null);
}

#[tokio::test]
async fn test_local_routes_are_not_proxied() {
    let upstream = start_mock_upstream().await;
    let server = serve(proxied_app("/up", &format!("http://{}", upstream))).await;

    let response = reqwest::get(server.url("/local")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "local");
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let dead = unused_addr().await;
    let server = serve(proxied_app("/up", &format!("http://{}", dead))).await;

    let response = reqwest::get(server.url("/up/anything")).await.unwrap();
    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn test_websocket_is_relayed_both_ways() {
    let upstream = start_mock_upstream().await;
    let server = serve(proxied_app("/up", &format!("http://{}", upstream))).await;

    let mut request = server.ws_url("/up/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", "chat".parse().unwrap());
    let (mut ws, response) = within(tokio_tungstenite::connect_async(request)).await.unwrap();
    assert_eq!(response.headers()["sec-websocket-protocol"], "chat");

    ws.send(Message::text("over the relay")).await.unwrap();
    let echoed = within(ws.next()).await.unwrap().unwrap();
    assert_eq!(echoed.to_text().unwrap(), "over the relay");

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let echoed = within(ws.next()).await.unwrap().unwrap();
    assert_eq!(echoed.into_data().as_ref(), &[1u8, 2, 3][..]);

    ws.close(None).await.unwrap();
    // The relay answers the close and the stream ends.
    while let Some(frame) = within(ws.next()).await {
        if frame.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn test_unreachable_websocket_upstream_closes_client() {
    let dead = unused_addr().await;
    let server = serve(proxied_app("/up", &format!("http://{}", dead))).await;

    // The client is still upgraded, then closed.
    let (mut ws, _) = within(tokio_tungstenite::connect_async(server.ws_url("/up/ws")))
        .await
        .unwrap();

    match within(ws.next()).await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1014),
        Some(Ok(other)) => panic!("expected close frame, got {:?}", other),
        // A client that rejects 1014 still sees the connection end.
        Some(Err(_)) | None => {}
    }
}
