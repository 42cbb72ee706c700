//! Durable key -> tick token storage

use crate::core::error::Result;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Last committed tick token per storage key
pub trait TickStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, token: &str) -> Result<()>;
}

impl<T: TickStore + ?Sized> TickStore for &mut T {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, token: &str) -> Result<()> {
        (**self).set(key, token)
    }
}

/// Process-local store, lost on exit
#[derive(Debug, Clone, Default)]
pub struct MemoryTickStore {
    entries: BTreeMap<String, String>,
}

impl MemoryTickStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TickStore for MemoryTickStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, token: &str) -> Result<()> {
        self.entries.insert(key.to_string(), token.to_string());
        Ok(())
    }
}

/// One JSON object of key -> token shared by every run on this host.
///
/// Nothing is cached between calls: `get` reads the file, and `set` takes an
/// exclusive lock on a sidecar `.lock` file, re-reads, merges its one key and
/// atomically replaces the file. Overlapping `tick` and `bgs` runs therefore
/// never drop each other's keys.
#[derive(Debug)]
pub struct JsonFileTickStore {
    path: PathBuf,
}

impl JsonFileTickStore {
    /// Open the cache. A missing file is an empty cache; so is an unreadable
    /// or corrupt one, which is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self { path: path.into() };
        let entries = store.read_entries();
        tracing::debug!(path = %store.path.display(), entries = entries.len(), "Tick cache opened");
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn read_entries(&self) -> BTreeMap<String, String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Tick cache is corrupt, treating as empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read tick cache, treating as empty");
                BTreeMap::new()
            }
        }
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TickStore for JsonFileTickStore {
    fn get(&self, key: &str) -> Option<String> {
        self.read_entries().remove(key)
    }

    fn set(&mut self, key: &str, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.lock_path())?;
        lock.lock_exclusive()?;

        let mut entries = self.read_entries();
        entries.insert(key.to_string(), token.to_string());
        let written = self.write_entries(&entries);

        FileExt::unlock(&lock)?;
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("bgs-monitor-store-{}-{}", name, std::process::id()))
            .join("ticks.json")
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryTickStore::new();
        assert_eq!(store.get("global"), None);
        store.set("global", "2025-01-01T00:00:00Z").unwrap();
        assert_eq!(store.get("global").as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let path = temp_path("reopen");
        let _ = fs::remove_file(&path);

        let mut store = JsonFileTickStore::open(&path);
        assert_eq!(store.get("announce/global"), None);
        store.set("announce/global", "2025-01-01T00:00:00Z").unwrap();
        drop(store);

        let reopened = JsonFileTickStore::open(&path);
        assert_eq!(
            reopened.get("announce/global").as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_two_handles_keep_each_others_keys() {
        let path = temp_path("shared");
        let _ = fs::remove_dir_all(path.parent().unwrap());

        // Both opened before either writes, as overlapping tick/bgs runs do
        let mut announce = JsonFileTickStore::open(&path);
        let mut report = JsonFileTickStore::open(&path);
        announce.set("announce/global", "2025-01-01T00:00:00Z").unwrap();
        report.set("report/global", "2025-01-01T00:00:00Z").unwrap();

        let reopened = JsonFileTickStore::open(&path);
        assert_eq!(
            reopened.get("announce/global").as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
        assert_eq!(
            reopened.get("report/global").as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
        // Writes from another handle are visible without reopening
        assert_eq!(
            announce.get("report/global").as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_file_is_replaced_on_write() {
        let path = temp_path("rewrite");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let mut store = JsonFileTickStore::open(&path);
        store.set("report/global", "t1").unwrap();
        assert_eq!(store.get("report/global").as_deref(), Some("t1"));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let path = temp_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let store = JsonFileTickStore::open(&path);
        assert_eq!(store.get("global"), None);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
