//! Liveness checks and the expiry sweep.

use super::discovery::DiscoveryOptions;
use crate::backend::BackendClient;
use crate::config::HealthConfig;
use crate::platform::{self, EndpointEnumerator, SystemEndpoints};
use crate::registry::{Instance, InstanceRegistry};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Watches registered backends and keeps the registry honest.
///
/// Two independent checks exist. The process-alive check is authoritative
/// and is the only thing that expires an instance. The application ping is
/// advisory: a backend stuck on a long single-threaded job stays registered
/// even though it cannot answer.
pub struct HealthMonitor {
    pub(super) registry: Arc<InstanceRegistry>,
    pub(super) client: Arc<dyn BackendClient>,
    pub(super) endpoints: Arc<dyn EndpointEnumerator>,
    pub(super) discovery: DiscoveryOptions,
    expired_retention: Duration,
}

impl HealthMonitor {
    /// Monitor using the platform's process and socket enumeration.
    pub fn new(registry: Arc<InstanceRegistry>, client: Arc<dyn BackendClient>) -> Self {
        Self::with_endpoints(registry, client, Arc::new(SystemEndpoints))
    }

    /// Monitor with a custom endpoint enumerator.
    pub fn with_endpoints(
        registry: Arc<InstanceRegistry>,
        client: Arc<dyn BackendClient>,
        endpoints: Arc<dyn EndpointEnumerator>,
    ) -> Self {
        Self {
            registry,
            client,
            endpoints,
            discovery: DiscoveryOptions::default(),
            expired_retention: HealthConfig::EXPIRED_RETENTION,
        }
    }

    pub fn with_discovery_options(mut self, options: DiscoveryOptions) -> Self {
        self.discovery = options;
        self
    }

    /// How long expired records are kept before the sweep purges them.
    pub fn with_expired_retention(mut self, retention: Duration) -> Self {
        self.expired_retention = retention;
        self
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Expire every instance whose process is gone, then purge old expired
    /// records. Returns the IDs expired by this sweep.
    ///
    /// Ping results are never consulted here.
    pub fn cleanup_stale_instances(&self) -> Result<Vec<String>> {
        let mut expired = Vec::new();

        for (id, instance) in self.registry.list_instances()? {
            if platform::is_process_alive(instance.pid) {
                continue;
            }
            if self
                .registry
                .expire_instance(&id, HealthConfig::REASON_PROCESS_DEAD, None)?
            {
                info!(
                    "Removed dead instance {} ({}, pid {})",
                    id, instance.binary_name, instance.pid
                );
                expired.push(id);
            }
        }

        let purged = self.registry.cleanup_expired(self.expired_retention)?;
        if purged > 0 {
            debug!("Purged {} aged expired records", purged);
        }

        Ok(expired)
    }

    /// Process alive AND answering pings. For reporting only.
    pub async fn check_instance_health(&self, instance: &Instance) -> bool {
        platform::is_process_alive(instance.pid)
            && self.client.ping(&instance.host, instance.port).await
    }
}
