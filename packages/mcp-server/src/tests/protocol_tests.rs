use crate::context::ToolContext;
use crate::mcp::{INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION};
use crate::tests::test_helpers::{next_message, test_server};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn test_initialize() {
    let (server, mut rx) = test_server(ToolContext::new(vec![]));

    server.handle_line(
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test","version":"1.0"}}}"#,
    );
    let response = next_message(&mut rx).await;

    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(response["result"]["serverInfo"]["name"], "skybridge");
    assert!(response["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn test_ping_with_string_id() {
    let (server, mut rx) = test_server(ToolContext::new(vec![]));

    server.handle_line(r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#);

    assert_eq!(
        next_message(&mut rx).await,
        json!({"jsonrpc": "2.0", "id": "abc", "result": {}})
    );
}

#[tokio::test]
async fn test_tools_list_names() {
    let (server, mut rx) = test_server(ToolContext::new(vec![]));

    server.handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
    let response = next_message(&mut rx).await;

    let names: Vec<&str> = response["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["auth_status", "auth_login", "auth_logout", "access_token_info"]
    );
}

#[tokio::test]
async fn test_unknown_method() {
    let (server, mut rx) = test_server(ToolContext::new(vec![]));

    server.handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#);
    let response = next_message(&mut rx).await;

    assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
}

#[tokio::test]
async fn test_parse_error_has_null_id() {
    let (server, mut rx) = test_server(ToolContext::new(vec![]));

    server.handle_line("{not json");
    let response = next_message(&mut rx).await;

    assert_eq!(response["id"], serde_json::Value::Null);
    assert_eq!(response["error"]["code"], PARSE_ERROR);
}

#[tokio::test]
async fn test_tools_call_without_params() {
    let (server, mut rx) = test_server(ToolContext::new(vec![]));

    server.handle_line(r#"{"jsonrpc":"2.0","id":4,"method":"tools/call"}"#);
    let response = next_message(&mut rx).await;

    assert_eq!(response["error"]["code"], INVALID_PARAMS);
    assert!(server.tracker().is_empty());
}

#[tokio::test]
async fn test_notifications_get_no_response() {
    let (server, mut rx) = test_server(ToolContext::new(vec![]));

    server.handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
    server.handle_line(r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":99}}"#);
    server.handle_line(r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#);

    // The first thing written is the ping response
    assert_eq!(next_message(&mut rx).await["id"], 5);
}
