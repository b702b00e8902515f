//! Rebuilding registry state from the running system.
//!
//! When the serving process starts after the backends, it has missed their
//! registrations. Discovery scans the process table for backend executables,
//! asks the OS which TCP ports they listen on, confirms each port speaks the
//! backend protocol and registers what it finds.

use super::monitor::HealthMonitor;
use crate::backend::BackendMetadata;
use crate::config::{HealthConfig, RegistryConfig};
use crate::platform::Endpoint;
use crate::registry::InstanceMetadata;
use crate::{HubError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What discovery looks for.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Executable names of backend processes, compared case-insensitively
    /// without a `.exe` extension.
    pub process_names: Vec<String>,
    /// Address used to reach discovered ports.
    pub host: String,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            process_names: HealthConfig::BACKEND_PROCESS_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            host: RegistryConfig::DEFAULT_HOST.to_string(),
        }
    }
}

impl HealthMonitor {
    /// Scan for backends the registry does not know about and register them.
    ///
    /// Candidates that do not answer a ping or whose metadata cannot be read
    /// are skipped; nothing about one candidate stops the others. Returns the
    /// newly registered IDs.
    pub async fn rediscover(&self) -> Result<Vec<String>> {
        let enumerator = Arc::clone(&self.endpoints);
        let names = self.discovery.process_names.clone();
        let candidates = tokio::task::spawn_blocking(move || enumerator.candidate_endpoints(&names))
            .await
            .map_err(|e| HubError::Other(format!("Endpoint scan panicked: {}", e)))?;

        let known: HashSet<(u32, u16)> = self
            .registry
            .run_blocking(|r| r.list_instances())
            .await?
            .values()
            .map(|instance| (instance.pid, instance.port))
            .collect();

        let mut registered = Vec::new();
        for Endpoint { pid, port } in candidates {
            if known.contains(&(pid, port)) {
                continue;
            }
            if let Some(id) = self.try_register(pid, port).await {
                registered.push(id);
            }
        }

        if !registered.is_empty() {
            info!("Rediscovered {} backend instance(s)", registered.len());
        }
        Ok(registered)
    }

    /// Run [`rediscover`](Self::rediscover) only when no instance is registered.
    pub async fn rediscover_if_empty(&self) -> Result<Vec<String>> {
        if !self
            .registry
            .run_blocking(|r| r.list_instances())
            .await?
            .is_empty()
        {
            return Ok(Vec::new());
        }
        debug!("Registry is empty, scanning for running backends");
        self.rediscover().await
    }

    async fn try_register(&self, pid: u32, port: u16) -> Option<String> {
        let host = &self.discovery.host;

        if !self.client.ping(host, port).await {
            debug!("Skipping pid {} port {}: no ping response", pid, port);
            return None;
        }

        let metadata = match self.client.query_metadata(host, port).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping pid {} port {}: metadata query failed: {}", pid, port, e);
                return None;
            }
        };

        let idb_path = metadata
            .idb_path
            .clone()
            .or_else(|| metadata.path.clone())
            .unwrap_or_default();

        let registration = registration_metadata(&metadata, host);
        match self
            .registry
            .run_blocking(move |r| r.register(pid, port, &idb_path, registration))
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to register discovered pid {} port {}: {}", pid, port, e);
                None
            }
        }
    }
}

fn registration_metadata(metadata: &BackendMetadata, host: &str) -> InstanceMetadata {
    let binary_name = metadata.module.clone().or_else(|| {
        metadata
            .path
            .as_deref()
            .and_then(|p| p.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    });

    InstanceMetadata {
        host: Some(host.to_string()),
        binary_name,
        binary_path: metadata.path.clone(),
        arch: metadata.arch.clone(),
        ..Default::default()
    }
}
