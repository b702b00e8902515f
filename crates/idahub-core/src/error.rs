//! Error types for idahub.
//!
//! Routing failures carry the live candidate set so that the caller (usually
//! an automated agent) can correct itself on the next call.

use crate::registry::InstanceSummary;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the idahub library.
#[derive(Debug, Error)]
pub enum HubError {
    // Locking and persistence
    #[error("Could not acquire lock on {path} within {timeout:?}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("Registry document {path} is corrupt (quarantined to {quarantined_to})")]
    CorruptRegistry {
        path: PathBuf,
        quarantined_to: PathBuf,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Instance IDs
    #[error("Cannot generate unique instance ID for {candidate} (tried {attempts} suffixes)")]
    IdSpaceExhausted { candidate: String, attempts: usize },

    // Routing
    #[error("Missing required parameter 'instance_id'")]
    MissingInstanceId {
        available_instances: Vec<InstanceSummary>,
    },

    #[error("Instance '{instance_id}' not found")]
    InstanceNotFound {
        instance_id: String,
        available_instances: Vec<InstanceSummary>,
    },

    #[error("Instance '{instance_id}' expired at {expired_at} ({reason})")]
    Expired {
        instance_id: String,
        expired_at: String,
        reason: String,
        replaced_by: Option<String>,
        replacements: Vec<InstanceSummary>,
        available_instances: Vec<InstanceSummary>,
    },

    #[error("Instance '{instance_id}' binary changed: registered {expected}, now {actual}")]
    BinaryMismatch {
        instance_id: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to connect to instance at {host}:{port}: {message}")]
    Connectivity {
        host: String,
        port: u16,
        message: String,
    },

    #[error("Backend error {code}: {message}")]
    BackendError {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    // Response cache
    #[error("Cache entry '{cache_id}' not found or expired")]
    CacheEntryNotFound { cache_id: String },

    // Configuration and input
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for idahub operations.
pub type Result<T> = std::result::Result<T, HubError>;

impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        HubError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        let (host, port) = err
            .url()
            .map(|u| {
                (
                    u.host_str().unwrap_or_default().to_string(),
                    u.port_or_known_default().unwrap_or(0),
                )
            })
            .unwrap_or_default();
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else {
            err.to_string()
        };
        HubError::Connectivity {
            host,
            port,
            message,
        }
    }
}

impl HubError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        HubError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Connectivity failure or backend error
    /// - -32001: Instance or cache entry not found / expired
    /// - -32002: Binary identity mismatch
    /// - -32003: Registry lock timeout
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            HubError::Connectivity { .. } | HubError::BackendError { .. } => -32000,

            HubError::InstanceNotFound { .. }
            | HubError::Expired { .. }
            | HubError::CacheEntryNotFound { .. } => -32001,

            HubError::BinaryMismatch { .. } => -32002,

            HubError::LockTimeout { .. } => -32003,

            HubError::MissingInstanceId { .. } | HubError::Validation { .. } => -32602,

            _ => -32603,
        }
    }

    /// Render the local routing-failure shape:
    /// `{error, hint, available_instances | replacements, ...}`.
    pub fn to_routing_payload(&self) -> Value {
        match self {
            HubError::MissingInstanceId {
                available_instances,
            } => json!({
                "error": self.to_string(),
                "hint": "Call list_instances() and pass instance_id explicitly for every tool call.",
                "available_instances": available_instances,
            }),
            HubError::InstanceNotFound {
                available_instances,
                ..
            } => json!({
                "error": self.to_string(),
                "hint": "Use list_instances() to see all available instances.",
                "available_instances": available_instances,
            }),
            HubError::Expired {
                instance_id,
                expired_at,
                reason,
                replaced_by,
                replacements,
                available_instances,
            } => {
                if let Some(first) = replacements.first() {
                    json!({
                        "error": format!("Instance '{}' expired at {}", instance_id, expired_at),
                        "reason": reason,
                        "expired_at": expired_at,
                        "replaced_by": replaced_by,
                        "replacements": replacements,
                        "hint": format!("Use instance_id='{}' for subsequent calls.", first.id),
                    })
                } else {
                    json!({
                        "error": format!(
                            "Instance '{}' expired and no replacement found.",
                            instance_id
                        ),
                        "reason": reason,
                        "expired_at": expired_at,
                        "replaced_by": replaced_by,
                        "available_instances": available_instances,
                        "hint": "Use list_instances() to see all available instances.",
                    })
                }
            }
            HubError::BinaryMismatch { .. } => json!({
                "error": self.to_string(),
                "hint": "The instance switched analysis target. Use list_instances() to see current instances.",
            }),
            HubError::Connectivity { host, port, .. } => json!({
                "error": self.to_string(),
                "host": host,
                "port": port,
                "hint": "The instance did not answer. It may be busy or closed; retry or pick another instance.",
            }),
            HubError::BackendError { code, message, data } => json!({
                "error": {
                    "code": code,
                    "message": message,
                    "data": data,
                },
            }),
            HubError::CacheEntryNotFound { .. } => json!({
                "error": self.to_string(),
                "hint": "Cached output expires after a few minutes; re-run the original tool call.",
            }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, name: &str) -> InstanceSummary {
        InstanceSummary {
            id: id.to_string(),
            binary_name: name.to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = HubError::CacheEntryNotFound {
            cache_id: "deadbeef".into(),
        };
        assert_eq!(err.to_string(), "Cache entry 'deadbeef' not found or expired");
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            HubError::Connectivity {
                host: "127.0.0.1".into(),
                port: 1,
                message: "refused".into()
            }
            .to_rpc_error_code(),
            -32000
        );
        assert_eq!(
            HubError::MissingInstanceId {
                available_instances: vec![]
            }
            .to_rpc_error_code(),
            -32602
        );
    }

    #[test]
    fn test_missing_instance_id_payload_lists_instances() {
        let err = HubError::MissingInstanceId {
            available_instances: vec![summary("k7m2", "sample.exe")],
        };
        let payload = err.to_routing_payload();

        assert!(payload["error"].as_str().unwrap().contains("instance_id"));
        assert_eq!(payload["available_instances"][0]["id"], "k7m2");
        assert!(payload["hint"].is_string());
    }

    #[test]
    fn test_expired_payload_prefers_replacements() {
        let err = HubError::Expired {
            instance_id: "old1".into(),
            expired_at: "2026-01-01T00:00:00+00:00".into(),
            reason: "process_dead".into(),
            replaced_by: None,
            replacements: vec![summary("new1", "sample.exe")],
            available_instances: vec![summary("new1", "sample.exe")],
        };
        let payload = err.to_routing_payload();

        assert_eq!(payload["reason"], "process_dead");
        assert_eq!(payload["replacements"][0]["id"], "new1");
        assert!(payload.get("available_instances").is_none());
        assert!(payload["hint"].as_str().unwrap().contains("new1"));
    }

    #[test]
    fn test_expired_payload_without_replacement_lists_live_instances() {
        let err = HubError::Expired {
            instance_id: "old1".into(),
            expired_at: "2026-01-01T00:00:00+00:00".into(),
            reason: "stale_heartbeat".into(),
            replaced_by: None,
            replacements: vec![],
            available_instances: vec![summary("zz99", "other.dll")],
        };
        let payload = err.to_routing_payload();

        assert!(payload.get("replacements").is_none());
        assert_eq!(payload["available_instances"][0]["id"], "zz99");
    }
}
