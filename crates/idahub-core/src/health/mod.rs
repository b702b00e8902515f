//! Backend liveness and registry recovery.
//!
//! - `monitor` - process-alive sweep and reporting health checks
//! - `discovery` - process/port scan that repopulates an empty registry

pub mod discovery;
pub mod monitor;

pub use discovery::DiscoveryOptions;
pub use monitor::HealthMonitor;
