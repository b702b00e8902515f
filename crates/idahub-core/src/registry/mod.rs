//! Host-wide registry of running backend instances.
//!
//! Backends register themselves, send heartbeats and unregister. The serving
//! process reads the registry to route calls and expires records whose
//! process has died.
//!
//! # Location
//!
//! The document lives at `~/.ida-mcp/instances.json` unless `IDAHUB_REGISTRY`
//! or an explicit path says otherwise. A sibling `instances.json.lock` file
//! serializes access across processes.

pub mod instance_id;
pub mod instance_registry;
pub mod persist;
pub mod types;

pub use instance_id::{generate_instance_id, resolve_collision};
pub use instance_registry::InstanceRegistry;
pub use types::{ExpiredRecord, Instance, InstanceMetadata, InstanceSummary, RegistryDocument};
