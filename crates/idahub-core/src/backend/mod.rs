//! Talking to backends: JSON-RPC types and the HTTP client.

pub mod client;
pub mod protocol;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{BackendClient, BackendMetadata, BackendTimeouts, HttpBackendClient};
pub use protocol::{RpcError, RpcRequest, RpcResponse};
