//! Backend RPC client.
//!
//! Every backend serves JSON-RPC 2.0 over `POST http://host:port/mcp`. The
//! [`BackendClient`] trait is what the router and health monitor depend on;
//! [`HttpBackendClient`] is the real implementation.

use super::protocol::{RpcRequest, RpcResponse};
use crate::config::{BackendRpcConfig, HealthConfig};
use crate::{HubError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Self-reported identity of a backend, from the `ida://idb/metadata` resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendMetadata {
    /// Path of the input binary.
    #[serde(default)]
    pub path: Option<String>,
    /// Module (binary) name.
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub idb_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Operations the hub performs against a backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Application-level liveness. Never an error, just false.
    async fn ping(&self, host: &str, port: u16) -> bool;

    async fn query_metadata(&self, host: &str, port: u16) -> Result<BackendMetadata>;

    /// Tool schemas the backend exposes.
    async fn list_tools(&self, host: &str, port: u16) -> Result<Vec<Value>>;

    /// Forward `method` with `params` and return the backend's `result`.
    ///
    /// A JSON-RPC error envelope becomes [`HubError::BackendError`]; a
    /// transport failure or timeout becomes [`HubError::Connectivity`].
    async fn call(
        &self,
        host: &str,
        port: u16,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value>;
}

/// Per-operation timeouts for [`HttpBackendClient`].
#[derive(Debug, Clone, Copy)]
pub struct BackendTimeouts {
    pub ping: Duration,
    pub metadata: Duration,
    pub tools_list: Duration,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self {
            ping: HealthConfig::PING_TIMEOUT,
            metadata: HealthConfig::METADATA_TIMEOUT,
            tools_list: HealthConfig::TOOLS_LIST_TIMEOUT,
        }
    }
}

/// [`BackendClient`] over HTTP.
#[derive(Debug)]
pub struct HttpBackendClient {
    client: Client,
    timeouts: BackendTimeouts,
    next_id: AtomicU64,
}

impl HttpBackendClient {
    /// Create a client with the default timeouts.
    pub fn new() -> Result<Self> {
        Self::with_timeouts(BackendTimeouts::default())
    }

    /// Create a client with custom ping, metadata and tools/list timeouts.
    pub fn with_timeouts(timeouts: BackendTimeouts) -> Result<Self> {
        // Backends are local; never route them through a system proxy.
        let client = Client::builder()
            .no_proxy()
            .user_agent(concat!("idahub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HubError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeouts,
            next_id: AtomicU64::new(1),
        })
    }

    fn endpoint(host: &str, port: u16) -> String {
        if host.contains(':') && !host.starts_with('[') {
            format!("http://[{}]:{}{}", host, port, BackendRpcConfig::ENDPOINT_PATH)
        } else {
            format!("http://{}:{}{}", host, port, BackendRpcConfig::ENDPOINT_PATH)
        }
    }

    fn request(&self, method: &str, params: Option<Value>) -> RpcRequest {
        RpcRequest::new(method, params, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn post(
        &self,
        host: &str,
        port: u16,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<Value> {
        debug!("-> {}:{} {}", host, port, request.method);
        let response = self
            .client
            .post(Self::endpoint(host, port))
            .json(request)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        serde_json::from_slice::<Value>(&body).map_err(|e| HubError::Connectivity {
            host: host.to_string(),
            port,
            message: format!("HTTP {} with unreadable body: {}", status, e),
        })
    }

    /// Unwrap a JSON-RPC envelope. A body with neither `result` nor `error`
    /// is not an envelope and comes back unchanged.
    fn into_result(body: Value) -> Result<Value> {
        let is_envelope = body
            .as_object()
            .is_some_and(|obj| obj.contains_key("result") || obj.contains_key("error"));
        if !is_envelope {
            return Ok(body);
        }

        let response: RpcResponse = serde_json::from_value(body)?;
        if let Some(error) = response.error {
            return Err(HubError::BackendError {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn ping(&self, host: &str, port: u16) -> bool {
        let request = self.request(BackendRpcConfig::METHOD_PING, None);
        let sent = self
            .client
            .post(Self::endpoint(host, port))
            .json(&request)
            .timeout(self.timeouts.ping)
            .send()
            .await;

        match sent {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("Ping {}:{} failed: {}", host, port, e);
                false
            }
        }
    }

    async fn query_metadata(&self, host: &str, port: u16) -> Result<BackendMetadata> {
        let request = self.request(
            BackendRpcConfig::METHOD_RESOURCES_READ,
            Some(json!({ "uri": BackendRpcConfig::METADATA_URI })),
        );
        let response = self
            .post(host, port, &request, self.timeouts.metadata)
            .await?;
        let result = Self::into_result(response)?;

        let text = result
            .get("contents")
            .and_then(|c| c.get(0))
            .and_then(|first| first.get("text"))
            .and_then(Value::as_str)
            .ok_or_else(|| HubError::Validation {
                field: "contents".to_string(),
                message: format!("{}:{} returned no metadata contents", host, port),
            })?;

        Ok(serde_json::from_str(text)?)
    }

    async fn list_tools(&self, host: &str, port: u16) -> Result<Vec<Value>> {
        let request = self.request(BackendRpcConfig::METHOD_TOOLS_LIST, None);
        let response = self
            .post(host, port, &request, self.timeouts.tools_list)
            .await?;
        let result = Self::into_result(response)?;

        Ok(result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn call(
        &self,
        host: &str,
        port: u16,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let request = self.request(method, Some(params));
        let body = self.post(host, port, &request, timeout).await?;
        Self::into_result(body)
    }
}
