//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here rather than in the
//! registry, health or routing code.
//!
//! - `paths` - registry and lock file locations
//! - `process` - PID liveness and process-table scans
//! - `ports` - listening TCP port enumeration

pub mod paths;
pub mod ports;
pub mod process;

pub use paths::{app_dir, lock_path_for, registry_path};
pub use ports::{Endpoint, EndpointEnumerator, SystemEndpoints};
pub use process::{find_processes_by_name, is_process_alive, normalize_process_name};
