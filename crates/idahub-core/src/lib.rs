//! idahub core - coordination layer for many independently running IDA
//! backends on one host.
//!
//! Backends register themselves in a shared on-disk registry and are
//! addressed by short opaque IDs. The serving process uses this crate to
//! route each call to the backend it names, to expire backends whose process
//! has died, to rediscover backends after a restart, and to cache outputs too
//! large to return at once.
//!
//! # Example
//!
//! ```rust,ignore
//! use idahub_core::{HttpBackendClient, InstanceRegistry, Router, RouterOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> idahub_core::Result<()> {
//!     let registry = Arc::new(InstanceRegistry::open()?);
//!     let client = Arc::new(HttpBackendClient::new()?);
//!     let router = Router::new(registry, client, RouterOptions::default());
//!
//!     let result = router
//!         .route_request(
//!             "tools/call",
//!             serde_json::json!({
//!                 "name": "decompile",
//!                 "arguments": {"instance_id": "k7m2", "addr": "0x401000"}
//!             }),
//!         )
//!         .await?;
//!     println!("{}", result);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod lock;
pub mod platform;
pub mod registry;
pub mod router;

pub use backend::{
    BackendClient, BackendMetadata, BackendTimeouts, HttpBackendClient, RpcRequest, RpcResponse,
};
pub use cache::{CacheChunk, Clock, ManualClock, ResponseCache, ResponseCacheStats, SystemClock};
pub use error::{HubError, Result};
pub use health::{DiscoveryOptions, HealthMonitor};
pub use lock::{FileLock, FileLockGuard};
pub use registry::{
    ExpiredRecord, Instance, InstanceMetadata, InstanceRegistry, InstanceSummary,
    RegistryDocument,
};
pub use router::{Router, RouterOptions};
