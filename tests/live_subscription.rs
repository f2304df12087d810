//! Live subscriptions over a real WebSocket connection

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{call, serve, stored, test_state, wait_until};
use futures_util::{SinkExt, StreamExt};
use hookscope::config::AppConfig;
use hookscope::HubEvent;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, path: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}{}", addr, path))
        .await
        .unwrap();
    socket
}

async fn send_json(socket: &mut Socket, value: serde_json::Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next hub event delivered as a text frame
async fn next_event(socket: &mut Socket) -> HubEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("no event within 5s")
}

async fn capture_over_http(addr: SocketAddr, channel_id: &str, body: &str) -> serde_json::Value {
    let response = reqwest::Client::new()
        .post(format!("http://{}/capture/{}", addr, channel_id))
        .header("content-type", "application/json")
        .header("X-Test", "1")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    serde_json::from_slice(&response.bytes().await.unwrap()).unwrap()
}

#[tokio::test]
async fn test_join_then_receive_new_request() {
    let state = test_state(AppConfig::default());
    let addr = serve(state.clone()).await;

    let mut socket = connect(addr, "/ws").await;
    send_json(
        &mut socket,
        serde_json::json!({"type": "join", "channelId": "abc"}),
    )
    .await;
    wait_until(|| state.hub.subscriber_count("abc") == 1).await;

    let ack = capture_over_http(addr, "abc", "{\"a\":1}").await;

    match next_event(&mut socket).await {
        HubEvent::NewRequest {
            channel_id,
            request,
        } => {
            assert_eq!(channel_id, "abc");
            assert_eq!(request.id, ack["requestId"].as_str().unwrap());
            assert_eq!(request.body.as_deref(), Some("{\"a\":1}"));
            assert_eq!(request.headers["x-test"], "1");
            assert_eq!(*request, *stored(&state, "abc")[0]);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_channel_path_joins_on_connect() {
    let state = test_state(AppConfig::default());
    let addr = serve(state.clone()).await;

    let mut socket = connect(addr, "/ws/abc").await;
    wait_until(|| state.hub.subscriber_count("abc") == 1).await;

    capture_over_http(addr, "other", "ignored").await;
    capture_over_http(addr, "abc", "seen").await;

    match next_event(&mut socket).await {
        HubEvent::NewRequest {
            channel_id,
            request,
        } => {
            assert_eq!(channel_id, "abc");
            assert_eq!(request.body.as_deref(), Some("seen"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/channels/abc/requests")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&state, request).await;
    assert_eq!(status, StatusCode::OK);

    match next_event(&mut socket).await {
        HubEvent::Cleared { channel_id } => assert_eq!(channel_id, "abc"),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_leave_and_close_unsubscribe() {
    let state = test_state(AppConfig::default());
    let addr = serve(state.clone()).await;

    let mut socket = connect(addr, "/ws/abc").await;
    wait_until(|| state.hub.subscriber_count("abc") == 1).await;

    send_json(
        &mut socket,
        serde_json::json!({"type": "leave", "channelId": "abc"}),
    )
    .await;
    wait_until(|| state.hub.subscriber_count("abc") == 0).await;
    assert_eq!(state.hub.connection_count(), 1);

    socket.close(None).await.unwrap();
    wait_until(|| state.hub.connection_count() == 0).await;
}
