//! Integration tests for the idahub JSON-RPC server.
//!
//! Each test runs a fake backend in-process, registers it in a private
//! registry document and drives the real `idahub` binary over HTTP.

use axum::routing::post;
use axum::{Json, Router as AxumRouter};
use idahub_core::{InstanceMetadata, InstanceRegistry};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

// =============================================================================
// Fake backend
// =============================================================================

async fn backend_handler(Json(request): Json<Value>) -> Json<Value> {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request["method"].as_str().unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "ping" => json!({}),
        "resources/read" => {
            let metadata = json!({
                "path": "/samples/sample.exe",
                "module": "sample.exe",
                "arch": "x86_64",
            });
            json!({"contents": [{
                "uri": params["uri"],
                "mimeType": "application/json",
                "text": metadata.to_string(),
            }]})
        }
        "tools/list" => json!({"tools": [{
            "name": "decompile",
            "description": "Decompile a function",
            "inputSchema": {
                "type": "object",
                "properties": {"addr": {"type": "string"}},
                "required": ["addr"],
            },
        }]}),
        "tools/call" => {
            let text = match params["name"].as_str() {
                Some("dump") => "A".repeat(5_000),
                _ => "int main() { return 0; }".to_string(),
            };
            json!({
                "content": [{"type": "text", "text": text}],
                "structuredContent": {"arguments": params["arguments"]},
                "isError": false,
            })
        }
        _ => {
            return Json(json!({
                "jsonrpc": "2.0",
                "error": {"code": -32601, "message": "Method not found"},
                "id": id,
            }))
        }
    };
    Json(json!({"jsonrpc": "2.0", "result": result, "id": id}))
}

async fn spawn_backend() -> u16 {
    let app = AxumRouter::new().route("/mcp", post(backend_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn register(registry_path: &Path, port: u16, idb: &str) -> String {
    InstanceRegistry::open_at(registry_path)
        .unwrap()
        .register(
            std::process::id(),
            port,
            idb,
            InstanceMetadata::default()
                .with_binary("sample.exe", "/samples/sample.exe")
                .with_arch("x86_64"),
        )
        .unwrap()
}

// =============================================================================
// Server helpers
// =============================================================================

/// Make an RPC call to the server.
async fn rpc_call(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let json = rpc_call_raw(port, method, params).await?;
    if let Some(error) = json.get("error") {
        return Err(error.to_string());
    }
    Ok(json.get("result").cloned().unwrap_or(Value::Null))
}

/// Make an RPC call and return the full JSON-RPC payload.
async fn rpc_call_raw(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/mcp", port))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    response.json::<Value>().await.map_err(|e| e.to_string())
}

async fn call_tool(port: u16, name: &str, arguments: Value) -> Value {
    rpc_call(
        port,
        "tools/call",
        json!({"name": name, "arguments": arguments}),
    )
    .await
    .unwrap()
}

/// Check health endpoint.
async fn check_health(port: u16) -> bool {
    let client = reqwest::Client::new();
    if let Ok(response) = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        if let Ok(json) = response.json::<Value>().await {
            return json.get("status").and_then(|v| v.as_str()) == Some("ok");
        }
    }
    false
}

/// Wait for server to be ready.
async fn wait_for_server(port: u16, timeout_secs: u64) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(timeout_secs) {
        if check_health(port).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

fn binary_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_idahub") {
        return Ok(PathBuf::from(path));
    }
    let current_exe = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
    let target_debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

    let mut fallback = target_debug_dir.join("idahub");
    if cfg!(target_os = "windows") {
        fallback.set_extension("exe");
    }
    if !fallback.exists() {
        return Err(format!(
            "CARGO_BIN_EXE_idahub not set and fallback binary not found at {}",
            fallback.display()
        ));
    }
    Ok(fallback)
}

struct ServerHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start `idahub serve` and wait until `/health` is ready.
async fn start_server(registry_path: &Path) -> Result<ServerHandle, String> {
    let binary = binary_path()?;

    let mut child = tokio::process::Command::new(&binary)
        .arg("serve")
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .arg("--registry")
        .arg(registry_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn idahub: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("RPC_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid RPC_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read idahub stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port = discovered_port.ok_or_else(|| "RPC_PORT line not emitted by idahub".to_string())?;
    if !wait_for_server(port, 15).await {
        return Err(format!("idahub failed health check on port {port}"));
    }

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(ServerHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

/// Text of the first content block of a tool result.
fn first_text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().unwrap_or_default()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_health_and_initialize() {
    let temp_dir = TempDir::new().unwrap();
    let backend_port = spawn_backend().await;
    let registry_path = temp_dir.path().join("instances.json");
    register(&registry_path, backend_port, "/samples/sample.exe.i64");

    let server = start_server(&registry_path).await.unwrap();
    assert!(check_health(server.port).await);

    let init = rpc_call(server.port, "initialize", json!({})).await.unwrap();
    assert_eq!(init["serverInfo"]["name"], "idahub");

    let pong = rpc_call(server.port, "ping", json!({})).await.unwrap();
    assert_eq!(pong, json!({}));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_method_is_method_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let server = start_server(&temp_dir.path().join("instances.json"))
        .await
        .unwrap();

    let payload = rpc_call_raw(server.port, "resources/list", json!({}))
        .await
        .unwrap();
    assert_eq!(payload["error"]["code"], -32601);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tools_list_merges_management_and_backend_tools() {
    let temp_dir = TempDir::new().unwrap();
    let backend_port = spawn_backend().await;
    let registry_path = temp_dir.path().join("instances.json");
    register(&registry_path, backend_port, "/samples/sample.exe.i64");

    let server = start_server(&registry_path).await.unwrap();
    let result = rpc_call(server.port, "tools/list", json!({})).await.unwrap();
    let tools = result["tools"].as_array().unwrap();

    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    for expected in [
        "list_instances",
        "get_active_instance",
        "set_active_instance",
        "refresh_tools",
        "get_cached_output",
        "decompile",
    ] {
        assert!(names.contains(&expected), "missing tool {expected}");
    }

    let decompile = tools.iter().find(|t| t["name"] == "decompile").unwrap();
    let required = decompile["inputSchema"]["required"].as_array().unwrap();
    assert!(required.contains(&json!("instance_id")));
    assert!(required.contains(&json!("addr")));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_instances_reports_registry() {
    let temp_dir = TempDir::new().unwrap();
    let backend_port = spawn_backend().await;
    let registry_path = temp_dir.path().join("instances.json");
    let id = register(&registry_path, backend_port, "/samples/sample.exe.i64");

    let server = start_server(&registry_path).await.unwrap();
    let result = call_tool(server.port, "list_instances", json!({})).await;

    assert_eq!(result["isError"], false);
    let listing = &result["structuredContent"];
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["active"], id.as_str());
    let instance = &listing["instances"][0];
    assert_eq!(instance["id"], id.as_str());
    assert_eq!(instance["active"], true);
    assert_eq!(instance["binary_name"], "sample.exe");
    assert_eq!(instance["port"], backend_port);

    assert!(instance.get("healthy").is_none());

    let checked = call_tool(server.port, "list_instances", json!({"check_health": true})).await;
    assert_eq!(checked["structuredContent"]["instances"][0]["healthy"], true);

    let active = call_tool(server.port, "get_active_instance", json!({})).await;
    assert_eq!(active["structuredContent"]["id"], id.as_str());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_without_instance_id_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let backend_port = spawn_backend().await;
    let registry_path = temp_dir.path().join("instances.json");
    let id = register(&registry_path, backend_port, "/samples/sample.exe.i64");

    let server = start_server(&registry_path).await.unwrap();
    let result = call_tool(server.port, "decompile", json!({"addr": "0x401000"})).await;

    assert_eq!(result["isError"], true);
    let payload = &result["structuredContent"];
    assert!(payload["error"].as_str().unwrap().contains("instance_id"));
    assert_eq!(payload["available_instances"][0]["id"], id.as_str());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_routed_call_strips_instance_id() {
    let temp_dir = TempDir::new().unwrap();
    let backend_port = spawn_backend().await;
    let registry_path = temp_dir.path().join("instances.json");
    let id = register(&registry_path, backend_port, "/samples/sample.exe.i64");

    let server = start_server(&registry_path).await.unwrap();
    let result = call_tool(
        server.port,
        "decompile",
        json!({"instance_id": id, "addr": "0x401000"}),
    )
    .await;

    assert_eq!(result["isError"], false);
    let routed: Value = serde_json::from_str(first_text(&result)).unwrap();
    assert_eq!(
        routed["structuredContent"]["arguments"],
        json!({"addr": "0x401000"})
    );

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_output_is_truncated_and_retrievable() {
    let temp_dir = TempDir::new().unwrap();
    let backend_port = spawn_backend().await;
    let registry_path = temp_dir.path().join("instances.json");
    let id = register(&registry_path, backend_port, "/samples/sample.exe.i64");

    let server = start_server(&registry_path).await.unwrap();
    let result = call_tool(
        server.port,
        "dump",
        json!({"instance_id": id, "max_output_chars": 1000}),
    )
    .await;

    assert_eq!(result["isError"], false);
    let truncated = &result["structuredContent"]["_truncated"];
    let total = truncated["total_chars"].as_u64().unwrap();
    assert!(total > 5_000);
    assert_eq!(truncated["returned_chars"], 1000);
    assert_eq!(truncated["remaining_chars"].as_u64().unwrap(), total - 1000);

    let cache_id = truncated["cache_id"].as_str().unwrap();
    let rest = call_tool(
        server.port,
        "get_cached_output",
        json!({"cache_id": cache_id, "offset": 1000, "size": 0}),
    )
    .await;
    assert_eq!(rest["isError"], false);
    assert_eq!(rest["structuredContent"]["remaining_chars"], 0);
    assert_eq!(
        rest["structuredContent"]["size"].as_u64().unwrap(),
        total - 1000
    );
    assert_eq!(rest["structuredContent"]["instance_id"], id.as_str());

    let missing = call_tool(
        server.port,
        "get_cached_output",
        json!({"cache_id": "deadbeef"}),
    )
    .await;
    assert_eq!(missing["isError"], true);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_expired_instance_points_to_replacement() {
    let temp_dir = TempDir::new().unwrap();
    let backend_port = spawn_backend().await;
    let registry_path = temp_dir.path().join("instances.json");
    let live = register(&registry_path, backend_port, "/samples/sample.exe.i64");
    let gone = register(&registry_path, backend_port, "/samples/old/sample.exe.i64");
    InstanceRegistry::open_at(&registry_path)
        .unwrap()
        .expire_instance(&gone, "process_dead", None)
        .unwrap();

    let server = start_server(&registry_path).await.unwrap();
    let result = call_tool(server.port, "decompile", json!({"instance_id": gone})).await;

    assert_eq!(result["isError"], true);
    let payload = &result["structuredContent"];
    assert_eq!(payload["reason"], "process_dead");
    assert_eq!(payload["replacements"][0]["id"], live.as_str());
    assert!(payload["hint"].as_str().unwrap().contains(&live));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_set_active_instance_unknown_lists_available() {
    let temp_dir = TempDir::new().unwrap();
    let backend_port = spawn_backend().await;
    let registry_path = temp_dir.path().join("instances.json");
    let id = register(&registry_path, backend_port, "/samples/sample.exe.i64");

    let server = start_server(&registry_path).await.unwrap();

    let missing = call_tool(
        server.port,
        "set_active_instance",
        json!({"instance_id": "zzzz"}),
    )
    .await;
    assert_eq!(missing["isError"], true);
    assert_eq!(
        missing["structuredContent"]["available"][0],
        format!("{} (sample.exe)", id)
    );

    let ok = call_tool(server.port, "set_active_instance", json!({"instance_id": id})).await;
    assert_eq!(ok["isError"], false);
    assert_eq!(ok["structuredContent"]["active"], id.as_str());

    let refreshed = call_tool(server.port, "refresh_tools", json!({})).await;
    assert_eq!(refreshed["structuredContent"]["refreshed"], true);
    assert_eq!(refreshed["structuredContent"]["tools_count"], 6);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_command_prints_instances() {
    let temp_dir = TempDir::new().unwrap();
    let registry_path = temp_dir.path().join("instances.json");
    let id = register(&registry_path, 40123, "/samples/sample.exe.i64");

    let output = tokio::process::Command::new(binary_path().unwrap())
        .arg("list")
        .arg("--registry")
        .arg(&registry_path)
        .output()
        .await
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&id));
    assert!(stdout.contains("127.0.0.1:40123"));
    assert!(stdout.contains("sample.exe"));
}
