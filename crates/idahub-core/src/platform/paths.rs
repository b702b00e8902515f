//! Well-known filesystem locations.

use crate::config::RegistryConfig;
use crate::error::{HubError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Per-user state directory shared by the backends and the serving process.
///
/// `~/.ida-mcp` on every platform.
pub fn app_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| HubError::Config {
        message: "Could not determine home directory".to_string(),
    })?;
    Ok(home.join(RegistryConfig::APP_DIR_NAME))
}

/// Resolve the registry document path.
///
/// `IDAHUB_REGISTRY` wins when set and non-empty, otherwise
/// `{app_dir}/instances.json`.
pub fn registry_path() -> Result<PathBuf> {
    registry_path_from(std::env::var_os(RegistryConfig::PATH_ENV))
}

fn registry_path_from(env_value: Option<OsString>) -> Result<PathBuf> {
    match env_value {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => Ok(app_dir()?.join(RegistryConfig::DOCUMENT_FILENAME)),
    }
}

/// Sibling lock file for a registry document: `<path>.lock`.
pub fn lock_path_for(registry_path: &Path) -> PathBuf {
    let mut name = registry_path.as_os_str().to_owned();
    name.push(RegistryConfig::LOCK_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_appends_suffix() {
        let lock = lock_path_for(Path::new("/tmp/reg/instances.json"));
        assert_eq!(lock, PathBuf::from("/tmp/reg/instances.json.lock"));
    }

    #[test]
    fn test_env_override_wins() {
        let path = registry_path_from(Some(OsString::from("/srv/shared/reg.json"))).unwrap();
        assert_eq!(path, PathBuf::from("/srv/shared/reg.json"));
    }

    #[test]
    fn test_default_is_under_home() {
        if dirs::home_dir().is_none() {
            return;
        }
        let path = registry_path_from(Some(OsString::new())).unwrap();
        assert!(path.ends_with(".ida-mcp/instances.json"));
    }
}
