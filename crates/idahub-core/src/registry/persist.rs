//! Registry document persistence.
//!
//! Writes go through a temp file with a PID+TID suffix, are fsynced and then
//! renamed over the target, so a reader sees either the old or the new
//! document and never a partial one. A document that fails to parse is moved
//! aside to `<file>.corrupt-<timestamp>` and replaced by an empty one.

use super::types::RegistryDocument;
use crate::config::RegistryConfig;
use crate::{HubError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::{process, thread};
use tracing::{debug, warn};

/// Current time as an RFC 3339 string with UTC offset.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Current time as fractional seconds since the Unix epoch.
pub fn now_epoch() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Parse an ISO-8601 timestamp to epoch seconds.
///
/// Naive timestamps are read as UTC. Anything unparsable is epoch 0, which
/// makes the owning record look maximally stale.
pub fn parse_epoch(timestamp: &str) -> f64 {
    if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
        return dt.timestamp_micros() as f64 / 1_000_000.0;
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc().timestamp_micros() as f64 / 1_000_000.0;
    }
    0.0
}

/// Load the registry document.
///
/// A missing file is an empty document. A file that does not parse is
/// quarantined and also yields an empty document.
pub fn load_document(path: &Path) -> Result<RegistryDocument> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RegistryDocument::default()),
        Err(e) => return Err(HubError::io_with_path(e, path)),
    };

    match serde_json::from_str::<RegistryDocument>(&contents) {
        Ok(doc) => Ok(doc),
        Err(parse_err) => {
            let quarantined_to = quarantine_path(path);
            match fs::rename(path, &quarantined_to) {
                Ok(()) => {
                    let err = HubError::CorruptRegistry {
                        path: path.to_path_buf(),
                        quarantined_to,
                    };
                    warn!("{}: {}", err, parse_err);
                }
                Err(e) => warn!(
                    "Registry document {} is corrupt ({}) and could not be quarantined: {}",
                    path.display(),
                    parse_err,
                    e
                ),
            }
            Ok(RegistryDocument::default())
        }
    }
}

/// Atomically replace the registry document on disk.
pub fn save_document(path: &Path, doc: &RegistryDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| HubError::io_with_path(e, parent))?;
        }
    }

    let temp_path = temp_path_for(path);
    let serialized = serde_json::to_string_pretty(doc)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| HubError::io_with_path(e, &temp_path))?;

        file.write_all(serialized.as_bytes())
            .map_err(|e| HubError::io_with_path(e, &temp_path))?;
        file.sync_all()
            .map_err(|e| HubError::io_with_path(e, &temp_path))?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(HubError::io_with_path(e, path));
    }

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

fn quarantine_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
    let mut name = path.as_os_str().to_owned();
    name.push(format!("{}{}", RegistryConfig::CORRUPT_INFIX, stamp));
    PathBuf::from(name)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.{}.tmp", process::id(), thread_id()));
    PathBuf::from(name)
}

fn thread_id() -> u64 {
    let mut hasher = DefaultHasher::new();
    format!("{:?}", thread::current().id()).hash(&mut hasher);
    hasher.finish()
}
