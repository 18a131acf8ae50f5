//! End-to-end tests for the protocol engine over a real TCP port.
//!
//! These verify that:
//! - Unparsable bodies get -32700 and are never broadcast
//! - Every response reaches every open push channel, in order
//! - Unknown tools and capability failures map to the right error codes
//! - `/health` reports the port actually bound
//! - Stopping the engine ends open push channels

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;
use tokio::net::TcpListener;

#[tokio::test]
async fn parse_error_is_400_and_not_broadcast() {
    let host = Arc::new(CountingHost::default());
    let engine = start_engine(host.clone()).await;
    let client = reqwest::Client::new();

    let mut sse = SseClient::connect(&client, engine.port()).await;
    let endpoint = sse.endpoint().await;
    assert!(endpoint.starts_with("/message?sessionId="));

    let (status, body) = post_message(&client, engine.port(), "{\"jsonrpc\": ").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], -32700);
    assert!(body["id"].is_null());
    assert_eq!(host.call_count(), 0);

    // The first pushed message must be the ping, not the parse error.
    let ping = r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#;
    let (status, _) = post_message(&client, engine.port(), ping).await;
    assert_eq!(status, 200);
    assert_eq!(sse.next_message().await["id"], 2);

    engine.stop().await;
}

#[tokio::test]
async fn every_session_gets_every_response_in_order() {
    let host = Arc::new(CountingHost::default());
    let engine = start_engine(host.clone()).await;
    let client = reqwest::Client::new();

    let mut sessions = Vec::new();
    for _ in 0..3 {
        let mut sse = SseClient::connect(&client, engine.port()).await;
        sse.endpoint().await;
        sessions.push(sse);
    }
    assert_eq!(engine.sessions().len(), 3);

    for id in 1..=5 {
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": "notify", "arguments": { "message": format!("n{id}") } }
        });
        let (status, response) = post_message(&client, engine.port(), &body.to_string()).await;
        assert_eq!(status, 200);
        assert_eq!(response["result"]["content"][0]["text"], "notify done");
    }
    assert_eq!(host.call_count(), 5);

    for sse in &mut sessions {
        let ids: Vec<i64> = {
            let mut ids = Vec::new();
            for _ in 0..5 {
                ids.push(sse.next_message().await["id"].as_i64().unwrap());
            }
            ids
        };
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    engine.stop().await;
}

#[tokio::test]
async fn unknown_tool_is_invalid_params_without_side_effect() {
    let host = Arc::new(CountingHost::default());
    let engine = start_engine(host.clone()).await;
    let client = reqwest::Client::new();

    let body = r#"{"jsonrpc":"2.0","id":"x","method":"tools/call","params":{"name":"teleport","arguments":{}}}"#;
    let (status, response) = post_message(&client, engine.port(), body).await;
    assert_eq!(status, 200);
    assert_eq!(response["id"], "x");
    assert_eq!(response["error"]["code"], -32602);
    assert_eq!(host.call_count(), 0);

    engine.stop().await;
}

#[tokio::test]
async fn capability_failure_is_tool_execution_error() {
    let host = Arc::new(CountingHost::failing("speaker unplugged"));
    let engine = start_engine(host.clone()).await;
    let client = reqwest::Client::new();

    let body = r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"speak","arguments":{"text":"hi"}}}"#;
    let (_, response) = post_message(&client, engine.port(), body).await;
    assert_eq!(response["error"]["code"], -32000);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("speaker unplugged"));
    assert_eq!(host.call_count(), 1);

    engine.stop().await;
}

#[tokio::test]
async fn tools_list_is_stable_across_calls() {
    let host = Arc::new(CountingHost::default());
    let engine = start_engine(host).await;
    let client = reqwest::Client::new();
    let list = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;

    let (_, before) = post_message(&client, engine.port(), list).await;
    let call = r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"browser_screenshot"}}"#;
    post_message(&client, engine.port(), call).await;
    let (_, after) = post_message(&client, engine.port(), list).await;

    assert_eq!(before["result"], after["result"]);
    let names: Vec<&str> = before["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec![
            "notify",
            "show_message",
            "speak",
            "browser_navigate",
            "browser_click",
            "browser_screenshot"
        ]
    );

    engine.stop().await;
}

#[tokio::test]
async fn health_reports_fallback_port() {
    let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = held.local_addr().unwrap().port();

    let engine = start_engine_on(Arc::new(CountingHost::default()), taken).await;
    assert_ne!(engine.port(), taken);

    let health: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{}/health", engine.port()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({ "status": "ok", "port": engine.port() }));

    engine.stop().await;
}

#[tokio::test]
async fn stop_ends_open_push_channels() {
    let engine = start_engine(Arc::new(CountingHost::default())).await;
    let client = reqwest::Client::new();
    let mut sse = SseClient::connect(&client, engine.port()).await;
    sse.endpoint().await;

    let sessions = engine.sessions().clone();
    tokio::time::timeout(Duration::from_secs(5), engine.stop())
        .await
        .expect("engine stop should not hang on open push channels");

    assert!(sessions.is_empty());
    assert_eq!(sse.next_event().await, None);
}
