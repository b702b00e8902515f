//! Tool catalog and `tools/call` dispatch.
//!
//! Management tools are answered from the registry and the response cache.
//! Every other tool name is routed to the backend named by `instance_id`;
//! results larger than `max_output_chars` are cached and returned truncated.

use crate::server::AppState;
use idahub_core::config::{BackendRpcConfig, ResponseCacheConfig, RouterConfig};
use idahub_core::{HubError, ResponseCache, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

pub const LIST_INSTANCES: &str = "list_instances";
pub const GET_ACTIVE_INSTANCE: &str = "get_active_instance";
pub const SET_ACTIVE_INSTANCE: &str = "set_active_instance";
pub const REFRESH_TOOLS: &str = "refresh_tools";
pub const GET_CACHED_OUTPUT: &str = "get_cached_output";

/// Opt-in liveness check for `list_instances`.
pub const CHECK_HEALTH_ARG: &str = "check_health";

/// Argument consumed here and never forwarded.
pub const MAX_OUTPUT_CHARS_ARG: &str = "max_output_chars";

// ============================================================================
// Catalog
// ============================================================================

/// Schemas of the tools served locally.
pub fn management_tools() -> Vec<Value> {
    let no_args = json!({"type": "object", "properties": {}, "required": []});
    vec![
        json!({
            "name": LIST_INSTANCES,
            "description": "List all registered IDA Pro instances with their metadata.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    CHECK_HEALTH_ARG: {
                        "type": "boolean",
                        "description": "Also report whether each instance is alive and answering pings (default: false)",
                    },
                },
                "required": [],
            },
        }),
        json!({
            "name": GET_ACTIVE_INSTANCE,
            "description": "Get the currently active IDA Pro instance.",
            "inputSchema": no_args,
        }),
        json!({
            "name": SET_ACTIVE_INSTANCE,
            "description": "Set the active IDA Pro instance used to build the tool list.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "instance_id": {
                        "type": "string",
                        "description": "Instance ID to set as active (e.g., 'k7m2')",
                    },
                },
                "required": ["instance_id"],
            },
        }),
        json!({
            "name": REFRESH_TOOLS,
            "description": "Re-discover tools from IDA Pro instances.",
            "inputSchema": no_args,
        }),
        json!({
            "name": GET_CACHED_OUTPUT,
            "description": "Retrieve more of a truncated tool output by cache_id.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "cache_id": {
                        "type": "string",
                        "description": "Cache ID from the _truncated block of a previous response",
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Starting character position (default: 0)",
                    },
                    "size": {
                        "type": "integer",
                        "description": "Characters to return (default: 20000, 0 = all remaining)",
                    },
                },
                "required": ["cache_id"],
            },
        }),
    ]
}

fn is_management_tool(name: &str) -> bool {
    matches!(
        name,
        LIST_INSTANCES | GET_ACTIVE_INSTANCE | SET_ACTIVE_INSTANCE | REFRESH_TOOLS | GET_CACHED_OUTPUT
    )
}

/// Add a required `instance_id` and an optional `max_output_chars` to a
/// backend tool schema.
pub fn inject_routing_args(mut tool: Value) -> Value {
    let Some(tool_obj) = tool.as_object_mut() else {
        return tool;
    };
    let schema = tool_obj
        .entry("inputSchema")
        .or_insert_with(|| json!({"type": "object"}));
    let Some(schema) = schema.as_object_mut() else {
        return tool;
    };

    let properties = schema
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(properties) = properties.as_object_mut() {
        properties.insert(
            RouterConfig::INSTANCE_ID_ARG.to_string(),
            json!({
                "type": "string",
                "description": "Target IDA instance ID (from list_instances)",
            }),
        );
        properties.insert(
            MAX_OUTPUT_CHARS_ARG.to_string(),
            json!({
                "type": "integer",
                "description": "Truncate output beyond this many characters (default: 20000, 0 = unlimited)",
            }),
        );
    }

    let required = schema
        .entry("required")
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Some(required) = required.as_array_mut() {
        let id_arg = Value::String(RouterConfig::INSTANCE_ID_ARG.to_string());
        if !required.contains(&id_arg) {
            required.push(id_arg);
        }
    }

    tool
}

/// Rebuild the catalog: management tools plus the active instance's tools.
///
/// A backend that cannot list its tools contributes none. Returns the number
/// of tools now served.
pub async fn refresh_catalog(state: &AppState) -> Result<usize> {
    let mut catalog = management_tools();

    let active = state
        .registry
        .run_blocking(|r| match r.get_active()? {
            Some(id) => Ok(r.get_instance(&id)?.map(|instance| (id, instance))),
            None => Ok(None),
        })
        .await?;

    if let Some((active_id, instance)) = active {
        match state.client.list_tools(&instance.host, instance.port).await {
            Ok(tools) => {
                debug!("Instance {} exposes {} tools", active_id, tools.len());
                catalog.extend(
                    tools
                        .into_iter()
                        .filter(|tool| {
                            tool.get("name")
                                .and_then(Value::as_str)
                                .is_some_and(|name| !is_management_tool(name))
                        })
                        .map(inject_routing_args),
                );
            }
            Err(e) => warn!("Failed to list tools from {}: {}", active_id, e),
        }
    }

    let count = catalog.len();
    *state.catalog.write().await = Some(catalog);
    Ok(count)
}

/// Current catalog, refreshing it first if it was never built.
pub async fn list_tools(state: &AppState) -> Result<Vec<Value>> {
    if let Some(catalog) = state.catalog.read().await.as_ref() {
        return Ok(catalog.clone());
    }
    refresh_catalog(state).await?;
    Ok(state.catalog.read().await.clone().unwrap_or_default())
}

// ============================================================================
// Results
// ============================================================================

fn text_result(text: impl Into<String>, is_error: bool) -> Value {
    json!({
        "content": [{"type": "text", "text": text.into()}],
        "isError": is_error,
    })
}

fn json_result(value: &Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    let mut result = text_result(text, is_error);
    result["structuredContent"] = value.clone();
    result
}

fn error_result(err: &HubError) -> Value {
    let payload = err.to_routing_payload();
    let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
    let mut result = text_result(format!("Error: {}", text), true);
    result["structuredContent"] = payload;
    result
}

/// Package a routed result, caching it when it exceeds `max_output` chars.
///
/// `max_output == 0` disables truncation.
pub fn build_routed_result(
    cache: &ResponseCache,
    tool_name: &str,
    instance_id: Option<&str>,
    result: Value,
    max_output: usize,
) -> Result<Value> {
    let text = serde_json::to_string_pretty(&result)?;
    let total_chars = text.chars().count();

    if max_output == 0 || total_chars <= max_output {
        return Ok(text_result(text, false));
    }

    let truncated: String = text.chars().take(max_output).collect();
    let cache_id = cache.store(text, tool_name, instance_id)?;
    let remaining = total_chars - max_output;
    let hint = format!(
        "Use get_cached_output(cache_id='{}', offset={}) to get more",
        cache_id, max_output
    );
    info!(
        "Truncated {} output to {} of {} chars (cache {})",
        tool_name, max_output, total_chars, cache_id
    );

    let notice = format!(
        "\n\n--- TRUNCATED ---\nShowing {} of {} chars ({} remaining)\ncache_id: {}\n{}",
        max_output, total_chars, remaining, cache_id, hint
    );
    Ok(json!({
        "content": [{"type": "text", "text": truncated + &notice}],
        "structuredContent": {
            "result": result,
            "_truncated": {
                "cache_id": cache_id,
                "total_chars": total_chars,
                "returned_chars": max_output,
                "remaining_chars": remaining,
                "hint": hint,
            },
        },
        "isError": false,
    }))
}

fn usize_arg(arguments: &Map<String, Value>, key: &str, default: usize) -> usize {
    arguments
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(default)
}

// ============================================================================
// Dispatch
// ============================================================================

/// Run one tool call. Failures are reported inside the tool result.
pub async fn call_tool(state: &AppState, name: &str, arguments: Map<String, Value>) -> Value {
    let outcome = match name {
        LIST_INSTANCES => list_instances(state, &arguments)
            .await
            .map(|v| json_result(&v, false)),
        GET_ACTIVE_INSTANCE => get_active_instance(state).await,
        SET_ACTIVE_INSTANCE => set_active_instance(state, &arguments).await,
        REFRESH_TOOLS => refresh_tools(state).await.map(|v| json_result(&v, false)),
        GET_CACHED_OUTPUT => get_cached_output(state, &arguments),
        _ => route_tool(state, name, arguments).await,
    };
    outcome.unwrap_or_else(|e| {
        warn!("Tool {} failed: {}", name, e);
        error_result(&e)
    })
}

async fn list_instances(state: &AppState, arguments: &Map<String, Value>) -> Result<Value> {
    let check_health = arguments
        .get(CHECK_HEALTH_ARG)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let (active, registered) = state
        .registry
        .run_blocking(|r| Ok((r.get_active()?, r.list_instances()?)))
        .await?;

    let mut instances = Vec::with_capacity(registered.len());
    for (id, info) in registered {
        let mut entry = json!({
            "active": active.as_deref() == Some(id.as_str()),
            "id": id,
            "binary_name": info.binary_name,
            "binary_path": info.binary_path,
            "arch": info.arch,
            "host": info.host,
            "port": info.port,
            "pid": info.pid,
            "registered_at": info.registered_at,
        });
        if check_health {
            entry["healthy"] = Value::Bool(state.monitor.check_instance_health(&info).await);
        }
        instances.push(entry);
    }
    Ok(json!({
        "active": active,
        "count": instances.len(),
        "instances": instances,
    }))
}

async fn get_active_instance(state: &AppState) -> Result<Value> {
    let (active_id, info) = state
        .registry
        .run_blocking(|r| match r.get_active()? {
            Some(id) => {
                let info = r.get_instance(&id)?;
                Ok((Some(id), info))
            }
            None => Ok((None, None)),
        })
        .await?;
    let Some(active_id) = active_id else {
        return Ok(json_result(
            &json!({"error": "No active instance. Open IDA Pro with the multi-MCP plugin."}),
            true,
        ));
    };
    let Some(info) = info else {
        return Ok(json_result(
            &json!({"error": format!("Active instance '{}' not found in registry.", active_id)}),
            true,
        ));
    };
    Ok(json_result(
        &json!({
            "id": active_id,
            "binary_name": info.binary_name,
            "binary_path": info.binary_path,
            "arch": info.arch,
            "host": info.host,
            "port": info.port,
        }),
        false,
    ))
}

async fn set_active_instance(state: &AppState, arguments: &Map<String, Value>) -> Result<Value> {
    let instance_id = arguments
        .get(RouterConfig::INSTANCE_ID_ARG)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let target = instance_id.clone();
    let (info, summaries) = state
        .registry
        .run_blocking(move |r| {
            let info = r.get_instance(&target)?;
            if info.is_some() {
                r.set_active(&target)?;
                Ok((info, Vec::new()))
            } else {
                Ok((None, r.summaries()?))
            }
        })
        .await?;

    let Some(info) = info else {
        let available: Vec<String> = summaries
            .into_iter()
            .map(|s| format!("{} ({})", s.id, s.binary_name))
            .collect();
        return Ok(json_result(
            &json!({
                "error": format!("Instance '{}' not found.", instance_id),
                "available": available,
            }),
            true,
        ));
    };

    // The catalog follows the active instance.
    if let Err(e) = refresh_catalog(state).await {
        warn!("Tool refresh after activation failed: {}", e);
    }
    Ok(json_result(
        &json!({"active": instance_id, "binary_name": info.binary_name}),
        false,
    ))
}

async fn refresh_tools(state: &AppState) -> Result<Value> {
    let found = state.monitor.rediscover_if_empty().await?;
    if !found.is_empty() {
        info!("Rediscovered {} instances during refresh", found.len());
    }
    state.router.clear_identity_cache();
    let count = refresh_catalog(state).await?;
    Ok(json!({"refreshed": true, "tools_count": count}))
}

fn get_cached_output(state: &AppState, arguments: &Map<String, Value>) -> Result<Value> {
    let cache_id = arguments
        .get("cache_id")
        .and_then(Value::as_str)
        .ok_or_else(|| HubError::Validation {
            field: "cache_id".to_string(),
            message: "is required".to_string(),
        })?;
    let offset = usize_arg(arguments, "offset", 0);
    let size = usize_arg(arguments, "size", ResponseCacheConfig::DEFAULT_MAX_OUTPUT_CHARS);

    let chunk = state.cache.get(cache_id, offset, size)?;
    let mut result = text_result(chunk.chunk.clone(), false);
    result["structuredContent"] = serde_json::to_value(&chunk)?;
    Ok(result)
}

async fn route_tool(state: &AppState, name: &str, mut arguments: Map<String, Value>) -> Result<Value> {
    let max_output = arguments
        .remove(MAX_OUTPUT_CHARS_ARG)
        .and_then(|v| v.as_u64())
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(ResponseCacheConfig::DEFAULT_MAX_OUTPUT_CHARS);
    let instance_id = arguments
        .get(RouterConfig::INSTANCE_ID_ARG)
        .and_then(Value::as_str)
        .map(str::to_string);

    let result = state
        .router
        .route_request(
            BackendRpcConfig::METHOD_TOOLS_CALL,
            json!({"name": name, "arguments": arguments}),
        )
        .await?;

    build_routed_result(&state.cache, name, instance_id.as_deref(), result, max_output)
}
