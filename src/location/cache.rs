//! Resolution cache, file-backed at `<cache dir>/geofuse/resolutions.json`.
//!
//! Keys are `LocationQuery::cache_key()` values. Entries expire after the
//! configured TTL (30 days by default) and are dropped on load and on every
//! persist. Concurrent writers: last write wins. Persists run one at a time on
//! the blocking pool and replace the file through a rename.

use super::types::ResolvedLocation;
use crate::config::CacheConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const DAY_MS: i64 = 24 * 3600 * 1000;

#[derive(Serialize, Deserialize, Clone)]
struct CacheEntry {
    resolved: ResolvedLocation,
    /// Insertion time, unix millis.
    timestamp: i64,
}

pub struct ResolutionCache {
    /// `None` keeps everything in memory.
    path: Option<PathBuf>,
    ttl_ms: i64,
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Held from snapshot to rename so persists land in order.
    persist_lock: tokio::sync::Mutex<()>,
}

impl ResolutionCache {
    /// Build from config: disabled → in-memory, else the configured or default file.
    pub fn from_config(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::in_memory(config.ttl_days);
        }
        match config.path.clone().or_else(Self::default_path) {
            Some(path) => Self::load_from(path, config.ttl_days),
            None => Self::in_memory(config.ttl_days),
        }
    }

    pub fn in_memory(ttl_days: i64) -> Self {
        Self::with_entries(None, ttl_days, HashMap::new())
    }

    /// Load from a specific file. A missing or unreadable file starts empty.
    pub fn load_from(path: PathBuf, ttl_days: i64) -> Self {
        let mut entries = Self::read_file(&path).unwrap_or_default();
        let ttl_ms = ttl_days.saturating_mul(DAY_MS);
        let expired = drop_expired(&mut entries, ttl_ms, chrono::Utc::now().timestamp_millis());
        tracing::debug!(path = %path.display(), entries = entries.len(), expired, "resolution cache loaded");
        Self::with_entries(Some(path), ttl_days, entries)
    }

    fn with_entries(path: Option<PathBuf>, ttl_days: i64, entries: HashMap<String, CacheEntry>) -> Self {
        Self {
            path,
            ttl_ms: ttl_days.saturating_mul(DAY_MS),
            entries: RwLock::new(entries),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("geofuse").join("resolutions.json"))
    }

    fn read_file(path: &Path) -> Option<HashMap<String, CacheEntry>> {
        let data = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(entries) => Some(entries),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable cache file");
                None
            }
        }
    }

    /// Cached resolution for `key`, unless missing or expired.
    pub fn get(&self, key: &str) -> Option<ResolvedLocation> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        let now = chrono::Utc::now().timestamp_millis();
        if now.saturating_sub(entry.timestamp) > self.ttl_ms {
            return None;
        }
        let mut resolved = entry.resolved.clone();
        resolved.from_cache = true;
        Some(resolved)
    }

    /// Store under `key` and persist.
    pub async fn put_with_key(&self, key: &str, resolved: &ResolvedLocation) {
        let entry = CacheEntry {
            resolved: ResolvedLocation { from_cache: false, ..resolved.clone() },
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(key.to_string(), entry);
            }
            Err(_) => {
                tracing::warn!(key, "resolution cache lock poisoned, entry dropped");
                return;
            }
        }
        self.persist().await;
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = chrono::Utc::now().timestamp_millis();
        let removed = match self.entries.write() {
            Ok(mut entries) => drop_expired(&mut entries, self.ttl_ms, now),
            Err(_) => 0,
        };
        if removed > 0 {
            self.persist().await;
        }
        removed
    }

    async fn persist(&self) {
        let Some(path) = self.path.clone() else { return };
        let _guard = self.persist_lock.lock().await;
        let now = chrono::Utc::now().timestamp_millis();
        let json = match self.entries.write() {
            Ok(mut entries) => {
                drop_expired(&mut entries, self.ttl_ms, now);
                serde_json::to_string_pretty(&*entries)
            }
            Err(_) => return,
        };
        let json = match json {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to serialize resolution cache");
                return;
            }
        };
        let target = path.clone();
        let result = tokio::task::spawn_blocking(move || write_atomic(&target, &json))
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r);
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist resolution cache");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remove entries older than `ttl_ms` at `now`. Returns how many were removed.
fn drop_expired(entries: &mut HashMap<String, CacheEntry>, ttl_ms: i64, now: i64) -> usize {
    let before = entries.len();
    entries.retain(|_, e| now.saturating_sub(e.timestamp) <= ttl_ms);
    before - entries.len()
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}
