//! File-backed registry of running backend instances.

use super::instance_id::{generate_instance_id, resolve_collision};
use super::persist::{load_document, now_epoch, now_iso, parse_epoch, save_document};
use super::types::{
    ExpiredRecord, Instance, InstanceMetadata, InstanceSummary, RegistryDocument,
};
use crate::config::{HealthConfig, InstanceIdConfig, RegistryConfig};
use crate::lock::FileLock;
use crate::{platform, HubError, Result};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registry of backend instances shared by every process on the host.
///
/// Each public method is one transaction: acquire the lock file, load the
/// document, apply the change, write it back atomically, release. Nothing is
/// cached between calls, so concurrent writers in other processes are always
/// observed.
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    path: PathBuf,
    lock: FileLock,
}

impl InstanceRegistry {
    /// Open the registry at the default location (`IDAHUB_REGISTRY` or
    /// `~/.ida-mcp/instances.json`).
    pub fn open() -> Result<Self> {
        let path = platform::registry_path()?;
        Self::open_at(&path)
    }

    /// Open the registry at a specific path, creating its directory.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| HubError::io_with_path(e, parent))?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock: FileLock::new(platform::lock_path_for(path)),
        })
    }

    /// Override how long each transaction waits for the lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock = self.lock.with_timeout(timeout);
        self
    }

    /// Path of the registry document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run registry transactions on the blocking pool.
    ///
    /// Every operation may wait on the lock file and fsync, so async callers
    /// go through here instead of calling the methods on a runtime worker.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&InstanceRegistry) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.clone();
        tokio::task::spawn_blocking(move || f(&registry))
            .await
            .map_err(|e| HubError::Other(format!("Registry task failed: {}", e)))?
    }

    fn read<T>(&self, f: impl FnOnce(&RegistryDocument) -> T) -> Result<T> {
        let _guard = self.lock.acquire()?;
        let doc = load_document(&self.path)?;
        Ok(f(&doc))
    }

    fn update<T>(&self, f: impl FnOnce(&mut RegistryDocument) -> Result<T>) -> Result<T> {
        let _guard = self.lock.acquire()?;
        let mut doc = load_document(&self.path)?;
        let before = doc.clone();
        let out = f(&mut doc)?;
        if doc != before {
            save_document(&self.path, &doc)?;
        }
        Ok(out)
    }

    // ========================================
    // Registration API
    // ========================================

    /// Register a backend and return its instance ID.
    ///
    /// Re-registering the same `(pid, port, idb_path)` while its record is
    /// still live replaces that record under the same ID, even when that ID
    /// was widened by a collision. Metadata keys naming a record field are
    /// dropped. The first
    /// registration on an empty registry becomes the active instance.
    pub fn register(
        &self,
        pid: u32,
        port: u16,
        idb_path: &str,
        metadata: InstanceMetadata,
    ) -> Result<String> {
        self.update(|doc| {
            let instance_id = match doc.find_target(pid, port, idb_path) {
                Some(existing) => existing.to_string(),
                None => {
                    let candidate = generate_instance_id(
                        pid,
                        port,
                        idb_path,
                        InstanceIdConfig::DEFAULT_LENGTH,
                    );
                    resolve_collision(&candidate, &doc.issued_ids(), pid, port, idb_path)?
                }
            };

            let mut extra = metadata.extra;
            extra.retain(|key, _| {
                let reserved = Instance::FIELD_NAMES.contains(&key.as_str());
                if reserved {
                    warn!("Ignoring metadata key '{}' that shadows a record field", key);
                }
                !reserved
            });

            let now = now_iso();
            let instance = Instance {
                pid,
                host: metadata
                    .host
                    .unwrap_or_else(|| RegistryConfig::DEFAULT_HOST.to_string()),
                port,
                binary_name: metadata
                    .binary_name
                    .unwrap_or_else(|| RegistryConfig::UNKNOWN.to_string()),
                binary_path: metadata.binary_path.unwrap_or_default(),
                idb_path: idb_path.to_string(),
                arch: metadata
                    .arch
                    .unwrap_or_else(|| RegistryConfig::UNKNOWN.to_string()),
                registered_at: now.clone(),
                last_heartbeat: now,
                extra,
            };

            info!(
                "Registered instance {} ({} pid={} port={})",
                instance_id, instance.binary_name, pid, port
            );
            doc.instances.insert(instance_id.clone(), instance);

            let active_is_live = doc
                .active_instance
                .as_ref()
                .is_some_and(|id| doc.instances.contains_key(id));
            if !active_is_live {
                doc.active_instance = Some(instance_id.clone());
            }

            Ok(instance_id)
        })
    }

    /// Remove an instance. Returns false if it was not registered.
    pub fn unregister(&self, instance_id: &str) -> Result<bool> {
        self.update(|doc| {
            if doc.instances.shift_remove(instance_id).is_none() {
                return Ok(false);
            }
            doc.repoint_active(instance_id);
            info!("Unregistered instance {}", instance_id);
            Ok(true)
        })
    }

    /// Bump `last_heartbeat` for an instance. Returns false if unknown.
    pub fn update_heartbeat(&self, instance_id: &str) -> Result<bool> {
        self.update(|doc| match doc.instances.get_mut(instance_id) {
            Some(instance) => {
                instance.last_heartbeat = now_iso();
                debug!("Heartbeat from {}", instance_id);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    // ========================================
    // Queries
    // ========================================

    pub fn get_instance(&self, instance_id: &str) -> Result<Option<Instance>> {
        self.read(|doc| doc.instances.get(instance_id).cloned())
    }

    /// All live instances in registration order.
    pub fn list_instances(&self) -> Result<IndexMap<String, Instance>> {
        self.read(|doc| doc.instances.clone())
    }

    /// `{id, binary_name}` for every live instance.
    pub fn summaries(&self) -> Result<Vec<InstanceSummary>> {
        self.read(|doc| {
            doc.instances
                .iter()
                .map(|(id, instance)| InstanceSummary::from_instance(id, instance))
                .collect()
        })
    }

    /// The active instance ID, if it still refers to a live instance.
    pub fn get_active(&self) -> Result<Option<String>> {
        self.read(|doc| {
            doc.active_instance
                .clone()
                .filter(|id| doc.instances.contains_key(id))
        })
    }

    /// Make `instance_id` active. Returns false, changing nothing, if unknown.
    pub fn set_active(&self, instance_id: &str) -> Result<bool> {
        self.update(|doc| {
            if !doc.instances.contains_key(instance_id) {
                return Ok(false);
            }
            doc.active_instance = Some(instance_id.to_string());
            Ok(true)
        })
    }

    pub fn get_expired(&self, instance_id: &str) -> Result<Option<ExpiredRecord>> {
        self.read(|doc| doc.expired.get(instance_id).cloned())
    }

    // ========================================
    // Expiry
    // ========================================

    /// Move a live instance to the expired set, keeping the reason.
    pub fn expire_instance(
        &self,
        instance_id: &str,
        reason: &str,
        replaced_by: Option<&str>,
    ) -> Result<bool> {
        self.update(|doc| {
            let found = doc.demote(
                instance_id,
                now_iso(),
                reason,
                replaced_by.map(str::to_string),
            );
            if found {
                info!("Expired instance {} ({})", instance_id, reason);
            }
            Ok(found)
        })
    }

    /// Purge expired records at least `max_age` old. Returns how many went.
    pub fn cleanup_expired(&self, max_age: Duration) -> Result<usize> {
        self.update(|doc| {
            let now = now_epoch();
            let max_age = max_age.as_secs_f64();
            let before = doc.expired.len();
            doc.expired
                .retain(|_, record| now - parse_epoch(&record.expired_at) < max_age);
            let removed = before - doc.expired.len();
            if removed > 0 {
                debug!("Purged {} expired records", removed);
            }
            Ok(removed)
        })
    }

    /// Expire every instance whose last heartbeat is older than `timeout`.
    pub fn cleanup_stale(&self, timeout: Duration) -> Result<Vec<String>> {
        self.update(|doc| {
            let now = now_epoch();
            let timeout = timeout.as_secs_f64();
            let stale: Vec<String> = doc
                .instances
                .iter()
                .filter(|(_, instance)| now - parse_epoch(&instance.last_heartbeat) > timeout)
                .map(|(id, _)| id.clone())
                .collect();

            let expired_at = now_iso();
            for id in &stale {
                doc.demote(
                    id,
                    expired_at.clone(),
                    HealthConfig::REASON_STALE_HEARTBEAT,
                    None,
                );
                info!("Instance {} missed its heartbeat window", id);
            }
            Ok(stale)
        })
    }
}
