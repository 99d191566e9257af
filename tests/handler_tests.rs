//! Integration tests for the built-in VM tools.
//!
//! Tests drive the dispatcher directly with in-memory tool calls and verify
//! the structured results and the invocation events it records.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use mcp_vm_bridge::audit::MemorySink;
use mcp_vm_bridge::engine::VmConfig;
use mcp_vm_bridge::handlers::{self, Dispatcher, ToolContext};
use mcp_vm_bridge::protocol::{JsonRpcRequest, RpcId, ToolCallParams, ToolResult};

fn test_dispatcher() -> (Dispatcher, Arc<MemorySink>) {
    let ctx = Arc::new(ToolContext::new(VmConfig::default(), None));
    let registry = handlers::builtin_registry(&ctx).unwrap();
    let sink = Arc::new(MemorySink::new());
    let dispatcher = Dispatcher::new(Arc::new(registry), sink.clone(), Duration::from_secs(30))
        .with_resources(ctx);
    (dispatcher, sink)
}

async fn call(dispatcher: &Dispatcher, name: &str, arguments: Value) -> ToolResult {
    dispatcher
        .call_tool(&ToolCallParams {
            name: name.to_string(),
            arguments: Some(arguments),
        })
        .await
}

fn payload(result: &ToolResult) -> Value {
    serde_json::from_str(&result.content[0].text).unwrap()
}

fn error_code(result: &ToolResult) -> String {
    assert!(result.is_error, "expected an error result, got {:?}", result);
    payload(result)["error"]["code"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// Catalogue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tools_list_in_registration_order() {
    let (dispatcher, _) = test_dispatcher();
    let req = JsonRpcRequest::new(RpcId::Number(1), "tools/list", None);

    let resp = dispatcher.dispatch(&req).await.unwrap();
    let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();

    assert_eq!(
        names,
        vec![
            "initialize_vm",
            "execute_vm_step",
            "provide_vm_input",
            "analyze_vm_state",
            "vm_instruction_trace",
            "run_uor_program",
            "health",
        ]
    );
    for tool in &tools {
        assert!(tool["description"].as_str().is_some_and(|d| !d.is_empty()));
        assert_eq!(tool["inputSchema"]["type"], "object");
    }
}

#[tokio::test]
async fn list_tools_alias_matches_tools_list() {
    let (dispatcher, _) = test_dispatcher();
    let a = dispatcher
        .dispatch(&JsonRpcRequest::new(RpcId::Number(1), "tools/list", None))
        .await
        .unwrap();
    let b = dispatcher
        .dispatch(&JsonRpcRequest::new(RpcId::Number(1), "list_tools", None))
        .await
        .unwrap();
    assert_eq!(a.result, b.result);
}

#[tokio::test]
async fn unknown_method_is_rpc_error() {
    let (dispatcher, _) = test_dispatcher();
    let resp = dispatcher
        .dispatch(&JsonRpcRequest::new(RpcId::Number(7), "prompts/list", None))
        .await
        .unwrap();
    assert_eq!(resp.error.unwrap().code, -32601);
}

#[tokio::test]
async fn tools_call_without_params_is_invalid_params() {
    let (dispatcher, _) = test_dispatcher();
    let resp = dispatcher
        .dispatch(&JsonRpcRequest::new(RpcId::Number(2), "tools/call", None))
        .await
        .unwrap();
    assert_eq!(resp.error.unwrap().code, -32602);
}

#[tokio::test]
async fn initialized_notification_has_no_response() {
    let (dispatcher, _) = test_dispatcher();
    let resp = dispatcher
        .dispatch(&JsonRpcRequest::notification("notifications/initialized"))
        .await;
    assert!(resp.is_none());
}

// ---------------------------------------------------------------------------
// Error results
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_tool_is_error_result() {
    let (dispatcher, sink) = test_dispatcher();

    let result = call(&dispatcher, "x", json!({})).await;
    assert_eq!(error_code(&result), "unknown_tool");
    assert_eq!(payload(&result)["error"]["message"], "Unknown tool: x");

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].is_success());
}

#[tokio::test]
async fn execute_before_initialize_is_rejected() {
    let (dispatcher, _) = test_dispatcher();
    let result = call(&dispatcher, "execute_vm_step", json!({ "instruction": "LOAD 1" })).await;
    assert_eq!(error_code(&result), "engine_not_initialized");
}

#[tokio::test]
async fn schema_violation_never_reaches_handler() {
    let (dispatcher, _) = test_dispatcher();
    call(&dispatcher, "initialize_vm", json!({})).await;

    let wrong_type = call(&dispatcher, "execute_vm_step", json!({ "instruction": 5 })).await;
    assert_eq!(error_code(&wrong_type), "invalid_arguments");

    let missing = call(&dispatcher, "execute_vm_step", json!({})).await;
    assert_eq!(error_code(&missing), "invalid_arguments");

    // Nothing was executed.
    let trace = payload(&call(&dispatcher, "vm_instruction_trace", json!({})).await);
    assert_eq!(trace["history_length"], 0);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let (dispatcher, _) = test_dispatcher();
    let result = call(&dispatcher, "initialize_vm", json!({ "memory_size": 0 })).await;
    assert_eq!(error_code(&result), "invalid_arguments");

    let result = call(
        &dispatcher,
        "initialize_vm",
        json!({ "config": { "memory_size": 2_000_000 } }),
    )
    .await;
    assert_eq!(error_code(&result), "invalid_arguments");
}

// ---------------------------------------------------------------------------
// VM tools
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initialize_reports_fresh_state() {
    let (dispatcher, _) = test_dispatcher();
    let result = call(
        &dispatcher,
        "initialize_vm",
        json!({ "config": { "memory_size": 64, "stack_size": 8 } }),
    )
    .await;
    assert!(!result.is_error);

    let vm = payload(&result);
    assert!(!vm["vm_id"].as_str().unwrap().is_empty());
    assert_eq!(vm["config"]["memory_size"], 64);
    assert_eq!(vm["config"]["stack_size"], 8);
    assert_eq!(vm["initial_state"]["registers"]["ACC"], 0);
    assert_eq!(vm["initial_state"]["flags"]["zero"], false);
}

#[tokio::test]
async fn load_then_add() {
    let (dispatcher, _) = test_dispatcher();
    call(&dispatcher, "initialize_vm", json!({})).await;

    let first = payload(&call(&dispatcher, "execute_vm_step", json!({ "instruction": "LOAD 42" })).await);
    assert_eq!(first["registers"]["ACC"], 42);
    assert_eq!(first["history_length"], 1);

    let second = payload(&call(&dispatcher, "execute_vm_step", json!({ "instruction": "ADD 8" })).await);
    assert_eq!(second["registers"]["ACC"], 50);
    assert_eq!(second["registers"]["PC"], 2);
    assert_eq!(second["flags"]["zero"], false);
    assert_eq!(second["history_length"], 2);

    let record = &second["execution_result"];
    assert_eq!(record["instruction"], "ADD 8");
    assert_eq!(record["state_before"]["registers"]["ACC"], 42);
    assert_eq!(record["state_after"]["registers"]["ACC"], 50);
    assert_eq!(record["status"], "executed");
}

#[tokio::test]
async fn unknown_opcode_is_recorded_not_raised() {
    let (dispatcher, _) = test_dispatcher();
    call(&dispatcher, "initialize_vm", json!({})).await;
    call(&dispatcher, "execute_vm_step", json!({ "instruction": "LOAD 3" })).await;

    let result = call(&dispatcher, "execute_vm_step", json!({ "instruction": "FROB 1" })).await;
    assert!(!result.is_error);

    let outcome = payload(&result);
    let record = &outcome["execution_result"];
    assert_eq!(record["result"], "Unknown instruction: FROB");
    assert_eq!(record["status"], "unknown");
    assert_eq!(record["state_before"], record["state_after"]);
    assert_eq!(outcome["registers"]["ACC"], 3);
    assert_eq!(outcome["history_length"], 2);
}

#[tokio::test]
async fn provide_input_pushes_onto_stack() {
    let (dispatcher, _) = test_dispatcher();
    call(&dispatcher, "initialize_vm", json!({ "stack_size": 1 })).await;

    let accepted = payload(&call(&dispatcher, "provide_vm_input", json!({ "value": 9 })).await);
    assert_eq!(accepted["accepted"], true);
    assert_eq!(accepted["stack_depth"], 1);
    assert_eq!(accepted["registers"]["SP"], 1);

    let full = call(&dispatcher, "provide_vm_input", json!({ "value": 10 })).await;
    assert_eq!(error_code(&full), "engine_error");

    let popped = payload(&call(&dispatcher, "execute_vm_step", json!({ "instruction": "POP" })).await);
    assert_eq!(popped["registers"]["ACC"], 9);
}

#[tokio::test]
async fn inputs_keep_history_continuous() {
    let (dispatcher, _) = test_dispatcher();
    call(&dispatcher, "initialize_vm", json!({})).await;
    call(&dispatcher, "execute_vm_step", json!({ "instruction": "LOAD 1" })).await;
    call(&dispatcher, "provide_vm_input", json!({ "value": 5 })).await;
    call(&dispatcher, "execute_vm_step", json!({ "instruction": "NOP" })).await;
    call(&dispatcher, "provide_vm_input", json!({ "value": 6 })).await;
    call(&dispatcher, "execute_vm_step", json!({ "instruction": "POP" })).await;

    let trace = payload(&call(&dispatcher, "vm_instruction_trace", json!({ "limit": 10 })).await);
    let records = trace["records"].as_array().unwrap();
    let instructions: Vec<_> = records.iter().map(|r| r["instruction"].clone()).collect();
    assert_eq!(instructions, vec!["LOAD 1", "INPUT 5", "NOP", "INPUT 6", "POP"]);
    for pair in records.windows(2) {
        assert_eq!(pair[0]["state_after"], pair[1]["state_before"]);
    }
    assert_eq!(trace["instructions_executed"], 5);
    assert_eq!(records[4]["state_after"]["registers"]["ACC"], 6);
}

#[tokio::test]
async fn analyze_state_reports_memory_and_history() {
    let (dispatcher, _) = test_dispatcher();
    call(&dispatcher, "initialize_vm", json!({ "memory_size": 16 })).await;
    for instruction in ["LOAD 5", "STORE 3", "LOAD 6", "STORE 4"] {
        call(&dispatcher, "execute_vm_step", json!({ "instruction": instruction })).await;
    }

    let report = payload(&call(&dispatcher, "analyze_vm_state", json!({})).await);
    assert_eq!(report["memory_size"], 16);
    assert_eq!(report["memory_in_use"], 2);
    assert_eq!(report["history_length"], 4);
    assert_eq!(report["instructions_executed"], 4);
    assert_eq!(report["registers"]["ACC"], 6);
}

#[tokio::test]
async fn instruction_trace_returns_most_recent() {
    let (dispatcher, _) = test_dispatcher();
    call(&dispatcher, "initialize_vm", json!({})).await;
    for n in 1..=5 {
        let instruction = format!("LOAD {n}");
        call(&dispatcher, "execute_vm_step", json!({ "instruction": instruction })).await;
    }

    let trace = payload(&call(&dispatcher, "vm_instruction_trace", json!({ "limit": 2 })).await);
    let records = trace["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["instruction"], "LOAD 4");
    assert_eq!(records[1]["instruction"], "LOAD 5");
    assert_eq!(trace["history_length"], 5);
}

#[tokio::test]
async fn reinitialize_discards_history() {
    let (dispatcher, _) = test_dispatcher();
    let first = payload(&call(&dispatcher, "initialize_vm", json!({})).await);
    call(&dispatcher, "execute_vm_step", json!({ "instruction": "LOAD 1" })).await;

    let second = payload(&call(&dispatcher, "initialize_vm", json!({})).await);
    assert_ne!(first["vm_id"], second["vm_id"]);

    let report = payload(&call(&dispatcher, "analyze_vm_state", json!({})).await);
    assert_eq!(report["history_length"], 0);
    assert_eq!(report["registers"]["ACC"], 0);
}

// ---------------------------------------------------------------------------
// run_uor_program
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_program_locally() {
    let (dispatcher, _) = test_dispatcher();
    let result = call(
        &dispatcher,
        "run_uor_program",
        json!({ "program": "LOAD 2\nMUL 3; ADD 1 # seven\nHALT", "parameters": {} }),
    )
    .await;
    assert!(!result.is_error);

    let value = payload(&result);
    assert!(value["execution_time"].as_f64().unwrap() >= 0.0);
    let report = &value["result"];
    assert_eq!(report["stop_reason"], "halted");
    assert_eq!(report["steps"], 4);
    assert_eq!(report["final_state"]["registers"]["ACC"], 7);
}

#[tokio::test]
async fn run_program_does_not_touch_session() {
    let (dispatcher, _) = test_dispatcher();
    call(&dispatcher, "run_uor_program", json!({ "program": "LOAD 1" })).await;

    let result = call(&dispatcher, "analyze_vm_state", json!({})).await;
    assert_eq!(error_code(&result), "engine_not_initialized");
}

#[tokio::test]
async fn run_program_honors_step_limit() {
    let (dispatcher, _) = test_dispatcher();
    let result = call(
        &dispatcher,
        "run_uor_program",
        json!({ "program": "JMP 0", "parameters": { "max_steps": 50 } }),
    )
    .await;

    let report = &payload(&result)["result"];
    assert_eq!(report["stop_reason"], "step_limit");
    assert_eq!(report["steps"], 50);
}

#[tokio::test]
async fn run_empty_program_is_invalid() {
    let (dispatcher, _) = test_dispatcher();
    let result = call(&dispatcher, "run_uor_program", json!({ "program": "# nothing\n\n" })).await;
    assert_eq!(error_code(&result), "invalid_arguments");
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

async fn read_resource(dispatcher: &Dispatcher, params: Value) -> Result<Value, i32> {
    let resp = dispatcher
        .dispatch(&JsonRpcRequest::new(RpcId::Number(11), "resources/read", Some(params)))
        .await
        .unwrap();
    match (resp.result, resp.error) {
        (Some(result), None) => {
            assert_eq!(result["contents"][0]["mimeType"], "application/json");
            Ok(serde_json::from_str(result["contents"][0]["text"].as_str().unwrap()).unwrap())
        }
        (_, Some(err)) => Err(err.code),
        other => panic!("malformed response: {other:?}"),
    }
}

#[tokio::test]
async fn resources_are_listed_in_order() {
    let (dispatcher, _) = test_dispatcher();
    let resp = dispatcher
        .dispatch(&JsonRpcRequest::new(RpcId::Number(10), "resources/list", None))
        .await
        .unwrap();
    let resources = resp.result.unwrap()["resources"].as_array().unwrap().clone();
    let uris: Vec<&str> = resources.iter().map(|r| r["uri"].as_str().unwrap()).collect();
    assert_eq!(uris, vec!["vm://state", "vm://execution_trace", "vm://memory"]);
    assert!(resources.iter().all(|r| r["mimeType"] == "application/json"));
}

#[tokio::test]
async fn initialize_advertises_resources() {
    let (dispatcher, _) = test_dispatcher();
    let resp = dispatcher
        .dispatch(&JsonRpcRequest::new(RpcId::Number(1), "initialize", Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(resp.result.unwrap()["capabilities"]["resources"], json!({}));
}

#[tokio::test]
async fn resources_read_vm_state_trace_and_memory() {
    let (dispatcher, _) = test_dispatcher();
    call(&dispatcher, "initialize_vm", json!({ "memory_size": 8 })).await;
    for instruction in ["LOAD 7", "STORE 2", "LOAD 9", "STORE 5", "LOAD 0", "FETCH 5"] {
        call(&dispatcher, "execute_vm_step", json!({ "instruction": instruction })).await;
    }

    let state = read_resource(&dispatcher, json!({ "uri": "vm://state" })).await.unwrap();
    assert_eq!(state["registers"]["ACC"], 9);
    assert_eq!(state["memory_in_use"], 2);

    let trace = read_resource(&dispatcher, json!({ "uri": "vm://execution_trace" }))
        .await
        .unwrap();
    assert_eq!(trace["records"].as_array().unwrap().len(), 6);
    assert_eq!(trace["records"][5]["instruction"], "FETCH 5");

    let memory = read_resource(&dispatcher, json!({ "uri": "vm://memory" })).await.unwrap();
    assert_eq!(memory["memory_size"], 8);
    assert_eq!(memory["cells"], json!([0, 0, 7, 0, 0, 9, 0, 0]));

    let window = read_resource(
        &dispatcher,
        json!({ "uri": "vm://memory", "offset": 2, "length": 4 }),
    )
    .await
    .unwrap();
    assert_eq!(window["offset"], 2);
    assert_eq!(window["cells"], json!([7, 0, 0, 9]));

    let tail = read_resource(
        &dispatcher,
        json!({ "uri": "vm://memory", "offset": 6, "length": 100 }),
    )
    .await
    .unwrap();
    assert_eq!(tail["cells"], json!([0, 0]));
}

#[tokio::test]
async fn resources_read_rejects_bad_requests() {
    let (dispatcher, _) = test_dispatcher();
    assert_eq!(read_resource(&dispatcher, json!({ "uri": "vm://nope" })).await, Err(-32602));
    assert_eq!(read_resource(&dispatcher, json!({})).await, Err(-32602));
    assert_eq!(read_resource(&dispatcher, json!({ "uri": "vm://state" })).await, Err(-32002));

    call(&dispatcher, "initialize_vm", json!({ "memory_size": 4 })).await;
    assert_eq!(
        read_resource(&dispatcher, json!({ "uri": "vm://memory", "offset": 5 })).await,
        Err(-32602)
    );
    assert!(read_resource(&dispatcher, json!({ "uri": "vm://memory", "offset": 4 }))
        .await
        .is_ok_and(|view| view["cells"] == json!([])));
}

#[tokio::test]
async fn dispatcher_without_resources_lists_none() {
    let ctx = Arc::new(ToolContext::new(VmConfig::default(), None));
    let registry = handlers::builtin_registry(&ctx).unwrap();
    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::new(MemorySink::new()),
        Duration::from_secs(30),
    );

    let resp = dispatcher
        .dispatch(&JsonRpcRequest::new(RpcId::Number(1), "resources/list", None))
        .await
        .unwrap();
    assert_eq!(resp.result.unwrap()["resources"], json!([]));
    assert_eq!(read_resource(&dispatcher, json!({ "uri": "vm://state" })).await, Err(-32602));
}

// ---------------------------------------------------------------------------
// Invocation events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_call_is_recorded() {
    let (dispatcher, sink) = test_dispatcher();
    call(&dispatcher, "health", json!({})).await;
    call(&dispatcher, "analyze_vm_state", json!({})).await;

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].tool, "health");
    assert!(events[0].is_success());
    assert_eq!(events[1].tool, "analyze_vm_state");
    match &events[1].outcome {
        mcp_vm_bridge::audit::InvocationOutcome::Failed { code, .. } => {
            assert_eq!(code, "engine_not_initialized")
        }
        other => panic!("expected failure, got {other:?}"),
    }
}
