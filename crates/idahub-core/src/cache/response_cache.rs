//! In-memory store for tool outputs too large to return in one piece.
//!
//! Bounded two ways: at most `max_entries` (least recently used evicted
//! first) and at most `ttl` old, counted from `store()`. Reads refresh the
//! LRU position but never the TTL. Expired entries are swept lazily on
//! `store`, `get`, `exists` and `stats`.

use super::clock::{Clock, SystemClock};
use crate::config::ResponseCacheConfig;
use crate::{HubError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct CacheEntry {
    content: String,
    total_chars: usize,
    created_at: Duration,
    tool_name: String,
    instance_id: Option<String>,
}

/// One slice of a cached output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheChunk {
    pub chunk: String,
    pub offset: usize,
    /// Characters actually returned.
    pub size: usize,
    pub total_chars: usize,
    pub remaining_chars: usize,
    pub cache_id: String,
    pub tool_name: String,
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCacheStats {
    pub entry_count: usize,
    pub max_entries: usize,
    pub ttl_seconds: u64,
}

/// Capacity- and TTL-bounded response cache.
pub struct ResponseCache {
    entries: Mutex<IndexMap<String, CacheEntry>>,
    max_entries: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(ResponseCacheConfig::MAX_ENTRIES, ResponseCacheConfig::TTL)
    }
}

impl ResponseCache {
    /// Create a cache holding at most `max_entries` (minimum 1) for `ttl`.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self::with_clock(max_entries, ttl, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(max_entries: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            max_entries: max_entries.max(1),
            ttl,
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexMap<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| HubError::Other("Response cache lock poisoned".to_string()))
    }

    fn sweep(&self, entries: &mut IndexMap<String, CacheEntry>) {
        let now = self.clock.now();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_sub(entry.created_at) <= self.ttl);
        let swept = before - entries.len();
        if swept > 0 {
            debug!("Swept {} expired cache entries", swept);
        }
    }

    /// Store `content` and return its 8-character ID.
    pub fn store(
        &self,
        content: impl Into<String>,
        tool_name: &str,
        instance_id: Option<&str>,
    ) -> Result<String> {
        let content = content.into();
        let mut entries = self.lock()?;
        self.sweep(&mut entries);

        while entries.len() >= self.max_entries {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                debug!("Evicted cache entry {}", evicted);
            }
        }

        let cache_id = loop {
            let candidate: String = Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(ResponseCacheConfig::ID_LENGTH)
                .collect();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };

        let total_chars = content.chars().count();
        entries.insert(
            cache_id.clone(),
            CacheEntry {
                content,
                total_chars,
                created_at: self.clock.now(),
                tool_name: tool_name.to_string(),
                instance_id: instance_id.map(str::to_string),
            },
        );
        debug!("Cached {} chars from {} as {}", total_chars, tool_name, cache_id);
        Ok(cache_id)
    }

    /// Read `size` characters starting at `offset`. `size == 0` means the rest.
    ///
    /// An offset at or past the end gives an empty chunk with nothing remaining.
    pub fn get(&self, cache_id: &str, offset: usize, size: usize) -> Result<CacheChunk> {
        let mut entries = self.lock()?;
        self.sweep(&mut entries);

        let entry = entries
            .shift_remove(cache_id)
            .ok_or_else(|| HubError::CacheEntryNotFound {
                cache_id: cache_id.to_string(),
            })?;

        let total = entry.total_chars;
        let (chunk, returned) = if offset >= total {
            (String::new(), 0)
        } else {
            let available = total - offset;
            let returned = if size == 0 { available } else { size.min(available) };
            let chunk: String = entry.content.chars().skip(offset).take(returned).collect();
            (chunk, returned)
        };

        let result = CacheChunk {
            chunk,
            offset,
            size: returned,
            total_chars: total,
            remaining_chars: total.saturating_sub(offset).saturating_sub(returned),
            cache_id: cache_id.to_string(),
            tool_name: entry.tool_name.clone(),
            instance_id: entry.instance_id.clone(),
        };

        // Re-insert at the back: most recently used.
        entries.insert(cache_id.to_string(), entry);
        Ok(result)
    }

    /// Whether `cache_id` is present and unexpired.
    pub fn exists(&self, cache_id: &str) -> bool {
        match self.lock() {
            Ok(mut entries) => {
                self.sweep(&mut entries);
                entries.contains_key(cache_id)
            }
            Err(_) => false,
        }
    }

    /// Remove one entry. Returns false if it was not there.
    pub fn delete(&self, cache_id: &str) -> bool {
        self.lock()
            .map(|mut entries| entries.shift_remove(cache_id).is_some())
            .unwrap_or(false)
    }

    /// Remove everything. Returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        self.lock()
            .map(|mut entries| {
                let count = entries.len();
                entries.clear();
                count
            })
            .unwrap_or(0)
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let entry_count = match self.lock() {
            Ok(mut entries) => {
                self.sweep(&mut entries);
                entries.len()
            }
            Err(_) => 0,
        };
        ResponseCacheStats {
            entry_count,
            max_entries: self.max_entries,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}
