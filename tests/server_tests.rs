//! Wire-level behaviour of the stdio server, driven with raw JSON lines.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use mcp_vm_bridge::audit::MemorySink;
use mcp_vm_bridge::config::ServerConfig;
use mcp_vm_bridge::engine::VmConfig;
use mcp_vm_bridge::handlers::{self, ToolContext};
use mcp_vm_bridge::server::McpServer;

struct Wire {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Wire {
    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("no response within 5s")
            .unwrap()
            .expect("server closed the stream");
        serde_json::from_str(&line).unwrap()
    }

    async fn initialize(&mut self) {
        self.send(r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"wire-test"}}}"#)
            .await;
        let resp = self.recv().await;
        assert_eq!(resp["result"]["serverInfo"]["name"], "mcp-vm-bridge");
        self.send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
    }
}

fn start() -> Wire {
    let ctx = Arc::new(ToolContext::new(VmConfig::default(), None));
    let registry = handlers::builtin_registry(&ctx).unwrap();
    attach(McpServer::with_registry(
        &ServerConfig::default(),
        registry,
        Arc::new(MemorySink::new()),
    ))
}

fn attach(mut server: McpServer) -> Wire {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(server_end);
        server.serve(reader, writer).await
    });

    let (reader, writer) = tokio::io::split(client_end);
    Wire {
        lines: BufReader::new(reader).lines(),
        writer,
    }
}

#[tokio::test]
async fn requests_before_initialize_are_rejected() {
    let mut wire = start();
    wire.send(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;

    let resp = wire.recv().await;
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["error"]["code"], -32600);
    assert_eq!(resp["error"]["message"], "Server not initialized");
}

#[tokio::test]
async fn malformed_json_is_parse_error() {
    let mut wire = start();
    wire.send("{not json").await;

    let resp = wire.recv().await;
    assert_eq!(resp["error"]["code"], -32700);
    assert!(resp.get("id").is_none());
}

#[tokio::test]
async fn wrong_jsonrpc_version_is_invalid_request() {
    let mut wire = start();
    wire.send(r#"{"jsonrpc":"1.0","id":"a","method":"initialize"}"#).await;

    let resp = wire.recv().await;
    assert_eq!(resp["id"], "a");
    assert_eq!(resp["error"]["code"], -32600);
}

#[tokio::test]
async fn tool_call_round_trip() {
    let mut wire = start();
    wire.initialize().await;

    wire.send(r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"initialize_vm","arguments":{}}}"#)
        .await;
    let init = wire.recv().await;
    assert_eq!(init["id"], 2);
    assert!(init["result"].get("isError").is_none());

    wire.send(r#"{"jsonrpc":"2.0","id":3,"method":"call_tool","params":{"name":"execute_vm_step","arguments":{"instruction":"LOAD 42"}}}"#)
        .await;
    let step = wire.recv().await;
    assert_eq!(step["id"], 3);
    let text = step["result"]["content"][0]["text"].as_str().unwrap();
    let outcome: Value = serde_json::from_str(text).unwrap();
    assert_eq!(outcome["registers"]["ACC"], 42);
}

#[tokio::test]
async fn unknown_tool_is_error_result_not_rpc_error() {
    let mut wire = start();
    wire.initialize().await;

    wire.send(r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"x"}}"#)
        .await;
    let resp = wire.recv().await;
    assert!(resp.get("error").is_none());
    assert_eq!(resp["result"]["isError"], true);

    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    let err: Value = serde_json::from_str(text).unwrap();
    assert_eq!(err, json!({ "error": { "code": "unknown_tool", "message": "Unknown tool: x" } }));
}

#[tokio::test]
async fn oversized_message_is_rejected_and_server_continues() {
    let mut wire = start();
    wire.initialize().await;

    let huge = format!(
        r#"{{"jsonrpc":"2.0","id":4,"method":"ping","params":{{"pad":"{}"}}}}"#,
        "x".repeat(1024 * 1024 + 1)
    );
    wire.send(&huge).await;

    let resp = wire.recv().await;
    assert_eq!(resp["error"]["code"], -32700);

    wire.send(r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#).await;
    let pong = wire.recv().await;
    assert_eq!(pong["id"], 5);
    assert_eq!(pong["result"], json!({}));
}

#[tokio::test]
async fn default_server_serves_vm_memory_resource() {
    let mut wire = attach(McpServer::new(ServerConfig::default()).unwrap());
    wire.initialize().await;

    wire.send(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"initialize_vm","arguments":{"memory_size":4}}}"#)
        .await;
    wire.recv().await;
    wire.send(r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"execute_vm_step","arguments":{"instruction":"LOAD 3"}}}"#)
        .await;
    wire.recv().await;
    wire.send(r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"execute_vm_step","arguments":{"instruction":"STORE 1"}}}"#)
        .await;
    wire.recv().await;

    wire.send(r#"{"jsonrpc":"2.0","id":4,"method":"resources/read","params":{"uri":"vm://memory"}}"#)
        .await;
    let resp = wire.recv().await;
    assert_eq!(resp["id"], 4);
    assert_eq!(resp["result"]["contents"][0]["uri"], "vm://memory");
    let text = resp["result"]["contents"][0]["text"].as_str().unwrap();
    let memory: Value = serde_json::from_str(text).unwrap();
    assert_eq!(memory["cells"], json!([0, 3, 0, 0]));

    wire.send(r#"{"jsonrpc":"2.0","id":5,"method":"resources/read","params":{"uri":"vm://registers"}}"#)
        .await;
    let resp = wire.recv().await;
    assert_eq!(resp["error"]["code"], -32602);
}
