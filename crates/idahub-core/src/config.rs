//! Centralized configuration for idahub.
//!
//! Defaults for locking, liveness, routing, caching and the serving process.

use std::time::Duration;

/// Registry document and lock configuration.
pub struct RegistryConfig;

impl RegistryConfig {
    /// Environment variable that overrides the registry document path.
    pub const PATH_ENV: &'static str = "IDAHUB_REGISTRY";
    pub const APP_DIR_NAME: &'static str = ".ida-mcp";
    pub const DOCUMENT_FILENAME: &'static str = "instances.json";
    pub const LOCK_SUFFIX: &'static str = ".lock";
    pub const CORRUPT_INFIX: &'static str = ".corrupt-";
    pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
    pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const UNKNOWN: &'static str = "unknown";
}

/// Instance ID allocation.
pub struct InstanceIdConfig;

impl InstanceIdConfig {
    pub const ALPHABET: &'static [u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    pub const DEFAULT_LENGTH: usize = 4;
}

/// Liveness and discovery configuration.
pub struct HealthConfig;

impl HealthConfig {
    pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(120);
    pub const EXPIRED_RETENTION: Duration = Duration::from_secs(3600);
    pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
    pub const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
    pub const TOOLS_LIST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const REASON_PROCESS_DEAD: &'static str = "process_dead";
    pub const REASON_STALE_HEARTBEAT: &'static str = "stale_heartbeat";
    /// Executable names (without extension, lowercase) of known backends.
    pub const BACKEND_PROCESS_NAMES: &'static [&'static str] =
        &["ida", "ida64", "idat", "idat64", "idaq", "idaq64"];
}

/// Router configuration.
pub struct RouterConfig;

impl RouterConfig {
    pub const IDENTITY_CACHE_TTL: Duration = Duration::from_secs(5);
    pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(300);
    pub const INSTANCE_ID_ARG: &'static str = "instance_id";
}

/// Backend RPC wire constants.
pub struct BackendRpcConfig;

impl BackendRpcConfig {
    pub const ENDPOINT_PATH: &'static str = "/mcp";
    pub const METHOD_PING: &'static str = "ping";
    pub const METHOD_RESOURCES_READ: &'static str = "resources/read";
    pub const METHOD_TOOLS_LIST: &'static str = "tools/list";
    pub const METHOD_TOOLS_CALL: &'static str = "tools/call";
    pub const METADATA_URI: &'static str = "ida://idb/metadata";
}

/// Response cache configuration.
pub struct ResponseCacheConfig;

impl ResponseCacheConfig {
    pub const MAX_ENTRIES: usize = 200;
    pub const TTL: Duration = Duration::from_secs(600);
    pub const ID_LENGTH: usize = 8;
    pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 20_000;
}

/// Serving process configuration.
pub struct ServerConfig;

impl ServerConfig {
    pub const NAME: &'static str = "idahub";
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
}
