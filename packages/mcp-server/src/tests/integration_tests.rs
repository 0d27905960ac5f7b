use std::sync::Arc;

use crate::context::ToolContext;
use crate::mcp::{INVALID_REQUEST, REQUEST_CANCELLED};
use crate::server::serve;
use crate::tests::test_helpers::{
    google_manager, next_message, store_credential, test_server, tool_payload, PendingFlow,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use skybridge_auth::AuthorizationState;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn pending_login_context(dir: &TempDir) -> ToolContext {
    ToolContext::new(vec![google_manager(
        dir,
        "http://127.0.0.1:9",
        Arc::new(PendingFlow),
    )])
}

fn login_call(id: Value, progress_token: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {
            "name": "auth_login",
            "arguments": {"provider": "google"},
            "_meta": {"progressToken": progress_token}
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_cancel_notification_ends_call_with_cancelled_error() {
    let dir = TempDir::new().unwrap();
    let (server, mut rx) = test_server(pending_login_context(&dir));

    server.handle_line(&login_call(json!(1), "p1"));

    let progress = next_message(&mut rx).await;
    assert_eq!(progress["method"], "notifications/progress");
    assert_eq!(
        progress["params"],
        json!({"progressToken": "p1", "progress": 0.0, "total": 2.0, "message": "Waiting for user consent"})
    );

    server.handle_line(
        r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":1,"reason":"User aborted"}}"#,
    );

    let response = next_message(&mut rx).await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["error"]["code"], REQUEST_CANCELLED);
    assert_eq!(response["error"]["message"], "Request cancelled: User aborted");
    assert!(server.tracker().is_empty());
}

#[tokio::test]
async fn test_duplicate_in_flight_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (server, mut rx) = test_server(pending_login_context(&dir));

    server.handle_line(&login_call(json!("dup"), "first"));
    // Progress from the first call
    next_message(&mut rx).await;

    server.handle_line(&login_call(json!("dup"), "second"));
    let rejection = next_message(&mut rx).await;
    assert_eq!(rejection["id"], "dup");
    assert_eq!(rejection["error"]["code"], INVALID_REQUEST);

    // The original call is untouched and still cancellable
    assert!(server.tracker().cancel_request(&"dup".into(), "done"));
    let response = next_message(&mut rx).await;
    assert_eq!(response["error"]["code"], REQUEST_CANCELLED);
}

#[tokio::test]
async fn test_fast_calls_run_while_login_waits() {
    let dir = TempDir::new().unwrap();
    store_credential(&dir, "still-valid", 3600).await;
    let (server, mut rx) = test_server(pending_login_context(&dir));

    server.handle_line(&login_call(json!(1), "p1"));
    next_message(&mut rx).await;

    server.handle_line(
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"auth_status","arguments":{}}}"#,
    );
    let status = next_message(&mut rx).await;

    assert_eq!(status["id"], 2);
    assert_eq!(tool_payload(&status)["providers"][0]["authenticated"], true);
    assert!(server.tracker().contains(&1.into()));

    server.shutdown().await;
    let response = next_message(&mut rx).await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["error"]["code"], REQUEST_CANCELLED);
}

fn frame(line: String) -> Vec<u8> {
    let mut bytes = line.into_bytes();
    bytes.push(b'\n');
    bytes
}

#[tokio::test]
async fn test_serve_answers_in_flight_calls_on_eof() {
    let dir = TempDir::new().unwrap();
    let manager = google_manager(&dir, "http://127.0.0.1:9", Arc::new(PendingFlow));
    let context = ToolContext::new(vec![manager.clone()]);

    let (client, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let (client_read, mut client_write) = tokio::io::split(client);

    let handle = tokio::spawn(serve(
        context,
        BufReader::new(server_read),
        server_write,
        std::future::pending::<()>(),
    ));

    let mut lines = BufReader::new(client_read).lines();

    client_write
        .write_all(&frame(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string()))
        .await
        .unwrap();
    let ping: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(ping["id"], 1);

    client_write
        .write_all(&frame(login_call(json!(2), "p2")))
        .await
        .unwrap();
    let progress: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(progress["params"]["progressToken"], "p2");

    client_write.shutdown().await.unwrap();

    let response: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(response["id"], 2);
    assert_eq!(response["error"]["code"], REQUEST_CANCELLED);
    assert_eq!(
        response["error"]["message"],
        "Request cancelled: Server shutting down"
    );

    handle.await.unwrap().unwrap();
    assert_eq!(lines.next_line().await.unwrap(), None);
    assert_eq!(manager.authorization_state(), AuthorizationState::Idle);
}
