//! In-memory [`BackendClient`] for unit tests.

use super::client::{BackendClient, BackendMetadata};
use crate::{HubError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Backends keyed by port. Ports never configured answer nothing.
#[derive(Default)]
pub(crate) struct FakeBackend {
    /// Ports that answer pings.
    pub responsive: Mutex<HashSet<u16>>,
    /// Metadata per port; absent means the query fails.
    pub metadata: Mutex<HashMap<u16, BackendMetadata>>,
    pub tools: Mutex<Vec<Value>>,
    /// `(port, method, params)` of every forwarded call.
    pub calls: Mutex<Vec<(u16, String, Value)>>,
    pub metadata_queries: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend on `port` that pings and reports `module` as its binary.
    pub fn with_backend(self, port: u16, module: &str) -> Self {
        self.responsive.lock().unwrap().insert(port);
        self.metadata.lock().unwrap().insert(
            port,
            BackendMetadata {
                path: Some(format!("/bin/{}", module)),
                module: Some(module.to_string()),
                arch: Some("x86_64".to_string()),
                ..Default::default()
            },
        );
        self
    }

    /// A backend on `port` that is up but never answers pings or metadata.
    pub fn with_silent(self, port: u16) -> Self {
        self.responsive.lock().unwrap().remove(&port);
        self.metadata.lock().unwrap().remove(&port);
        self
    }

    pub fn set_module(&self, port: u16, module: &str) {
        let mut metadata = self.metadata.lock().unwrap();
        let entry = metadata.entry(port).or_default();
        entry.module = Some(module.to_string());
    }

    pub fn forwarded(&self) -> Vec<(u16, String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    fn refused(host: &str, port: u16) -> HubError {
        HubError::Connectivity {
            host: host.to_string(),
            port,
            message: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn ping(&self, _host: &str, port: u16) -> bool {
        self.responsive.lock().unwrap().contains(&port)
    }

    async fn query_metadata(&self, host: &str, port: u16) -> Result<BackendMetadata> {
        self.metadata_queries.fetch_add(1, Ordering::SeqCst);
        self.metadata
            .lock()
            .unwrap()
            .get(&port)
            .cloned()
            .ok_or_else(|| Self::refused(host, port))
    }

    async fn list_tools(&self, host: &str, port: u16) -> Result<Vec<Value>> {
        if !self.responsive.lock().unwrap().contains(&port) {
            return Err(Self::refused(host, port));
        }
        Ok(self.tools.lock().unwrap().clone())
    }

    async fn call(
        &self,
        host: &str,
        port: u16,
        method: &str,
        params: Value,
        _timeout: Duration,
    ) -> Result<Value> {
        if !self.responsive.lock().unwrap().contains(&port) {
            return Err(Self::refused(host, port));
        }
        self.calls
            .lock()
            .unwrap()
            .push((port, method.to_string(), params.clone()));
        Ok(json!({
            "content": [{"type": "text", "text": "ok"}],
            "isError": false,
            "port": port,
        }))
    }
}
