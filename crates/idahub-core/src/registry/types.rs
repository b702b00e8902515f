//! Registry document types.
//!
//! The on-disk shape is
//! `{instances: {id: Instance}, active_instance: id|null, expired: {id: ExpiredRecord}}`.

use crate::config::RegistryConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_host() -> String {
    RegistryConfig::DEFAULT_HOST.to_string()
}

fn unknown() -> String {
    RegistryConfig::UNKNOWN.to_string()
}

/// A registered backend session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub pid: u32,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default = "unknown")]
    pub binary_name: String,
    #[serde(default)]
    pub binary_path: String,
    #[serde(default)]
    pub idb_path: String,
    #[serde(default = "unknown")]
    pub arch: String,
    #[serde(default)]
    pub registered_at: String,
    #[serde(default)]
    pub last_heartbeat: String,
    /// Free-form metadata supplied at registration.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Instance {
    /// Keys owned by the record itself. Free-form metadata may not reuse them.
    pub const FIELD_NAMES: &'static [&'static str] = &[
        "pid",
        "host",
        "port",
        "binary_name",
        "binary_path",
        "idb_path",
        "arch",
        "registered_at",
        "last_heartbeat",
    ];
}

/// Historical record left behind when an instance expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiredRecord {
    #[serde(default = "unknown")]
    pub binary_name: String,
    #[serde(default)]
    pub binary_path: String,
    #[serde(default)]
    pub expired_at: String,
    #[serde(default = "unknown")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<String>,
}

/// The whole registry document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub instances: IndexMap<String, Instance>,
    #[serde(default)]
    pub active_instance: Option<String>,
    #[serde(default)]
    pub expired: IndexMap<String, ExpiredRecord>,
}

impl RegistryDocument {
    /// Every ID currently issued, live or expired.
    pub fn issued_ids(&self) -> std::collections::HashSet<String> {
        self.instances
            .keys()
            .chain(self.expired.keys())
            .cloned()
            .collect()
    }

    /// ID of the live instance serving `(pid, port, idb_path)`, whatever its length.
    pub fn find_target(&self, pid: u32, port: u16, idb_path: &str) -> Option<&str> {
        self.instances
            .iter()
            .find(|(_, i)| i.pid == pid && i.port == port && i.idb_path == idb_path)
            .map(|(id, _)| id.as_str())
    }

    /// If `removed_id` was active, promote the first remaining instance or clear.
    pub(crate) fn repoint_active(&mut self, removed_id: &str) {
        if self.active_instance.as_deref() == Some(removed_id) {
            self.active_instance = self.instances.keys().next().cloned();
        }
    }

    /// Move a live instance into the expired set.
    pub(crate) fn demote(
        &mut self,
        instance_id: &str,
        expired_at: String,
        reason: &str,
        replaced_by: Option<String>,
    ) -> bool {
        let Some(instance) = self.instances.shift_remove(instance_id) else {
            return false;
        };
        self.expired.insert(
            instance_id.to_string(),
            ExpiredRecord {
                binary_name: instance.binary_name,
                binary_path: instance.binary_path,
                expired_at,
                reason: reason.to_string(),
                replaced_by,
            },
        );
        self.repoint_active(instance_id);
        true
    }
}

/// Optional descriptive fields supplied by a backend when registering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InstanceMetadata {
    pub fn with_binary(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.binary_name = Some(name.into());
        self.binary_path = Some(path.into());
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// `{id, binary_name}` pair used in routing error payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: String,
    pub binary_name: String,
}

impl InstanceSummary {
    pub fn from_instance(id: &str, instance: &Instance) -> Self {
        Self {
            id: id.to_string(),
            binary_name: instance.binary_name.clone(),
        }
    }
}
