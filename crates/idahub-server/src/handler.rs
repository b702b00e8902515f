//! JSON-RPC request handlers.

use crate::server::AppState;
use crate::tools;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use idahub_core::config::ServerConfig;
use idahub_core::{HubError, RpcRequest, RpcResponse};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error};

/// Protocol revision reported when the client does not ask for one.
const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RpcRequest>,
) -> Response {
    let method = request.method.as_str();
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id;

    debug!("RPC call: {}({})", method, params);

    // Notifications carry no id and get no body.
    if id.is_none() && method.starts_with("notifications/") {
        return StatusCode::ACCEPTED.into_response();
    }

    let result = match method {
        "initialize" => Ok(initialize(&params)),
        "ping" => Ok(json!({})),
        "tools/list" => tools::list_tools(&state)
            .await
            .map(|tools| json!({ "tools": tools })),
        "tools/call" => call_tool(&state, &params).await,
        _ => {
            return (
                StatusCode::OK,
                Json(RpcResponse::error(
                    id,
                    -32601,
                    format!("Method not found: {}", method),
                    None,
                )),
            )
                .into_response();
        }
    };

    match result {
        Ok(value) => (StatusCode::OK, Json(RpcResponse::success(id, value))).into_response(),
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = i64::from(e.to_rpc_error_code());
            (
                StatusCode::OK,
                Json(RpcResponse::error(id, code, e.to_string(), None)),
            )
                .into_response()
        }
    }
}

fn initialize(params: &Value) -> Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    json!({
        "protocolVersion": protocol_version,
        "capabilities": {"tools": {"listChanged": true}},
        "serverInfo": {
            "name": ServerConfig::NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

async fn call_tool(state: &AppState, params: &Value) -> idahub_core::Result<Value> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| HubError::Validation {
            field: "name".to_string(),
            message: "tools/call requires a tool name".to_string(),
        })?;
    let arguments = match params.get("arguments") {
        Some(Value::Object(arguments)) => arguments.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => {
            return Err(HubError::Validation {
                field: "arguments".to_string(),
                message: "must be an object".to_string(),
            })
        }
    };
    Ok(tools::call_tool(state, name, arguments).await)
}
