//! Large-response cache (§3, §4.5 discipline).
//!
//! At most one outstanding file at a time: writing a new one unlinks the
//! previous. Backs `ac_api_call`'s overflow path and `search_data`'s reads.

use crate::error::{CoreError, CoreResult};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct LargeResponseCache {
    dir: PathBuf,
    current: Mutex<Option<(PathBuf, usize)>>,
}

impl LargeResponseCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    /// Write `items` to the cache file, replacing any previous one.
    /// Returns the path and item count (§3 Large-response cache).
    pub fn store(&self, items: &[Value]) -> CoreResult<(PathBuf, usize)> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join("large_response_cache.json");
        let serialized = serde_json::to_string(items).map_err(|e| CoreError::ParseError(e.to_string()))?;
        std::fs::write(&path, serialized)?;

        let mut guard = self.current.lock().unwrap();
        if let Some((old_path, _)) = guard.take() {
            if old_path != path {
                let _ = std::fs::remove_file(&old_path);
            }
        }
        let count = items.len();
        *guard = Some((path.clone(), count));
        Ok((path, count))
    }

    /// Path and count of the currently cached response, if any.
    pub fn current(&self) -> Option<(PathBuf, usize)> {
        self.current.lock().unwrap().clone()
    }

    /// Read back the cached items for `search_data`. Errors with `NoCache`
    /// when nothing has been stored (or the file was removed out of band).
    pub fn read(&self) -> CoreResult<Vec<Value>> {
        let (path, _) = self.current.lock().unwrap().clone().ok_or(CoreError::NoCache)?;
        let text = std::fs::read_to_string(&path).map_err(|_| CoreError::NoCache)?;
        serde_json::from_str(&text).map_err(|e| CoreError::ParseError(e.to_string()))
    }

    /// Drop the cache file and forget it. Called on executor teardown and
    /// on agent `reset()` (§4.5 discipline).
    pub fn cleanup(&self) {
        let mut guard = self.current.lock().unwrap();
        if let Some((path, _)) = guard.take() {
            let _ = std::fs::remove_file(&path);
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LargeResponseCache::new(dir.path());
        let items = vec![json!({"a": 1}), json!({"a": 2})];
        let (path, count) = cache.store(&items).unwrap();
        assert_eq!(count, 2);
        assert!(path.exists());
        let read_back = cache.read().unwrap();
        assert_eq!(read_back.len(), 2);
    }

    #[test]
    fn read_without_store_is_no_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LargeResponseCache::new(dir.path());
        assert!(matches!(cache.read(), Err(CoreError::NoCache)));
    }

    #[test]
    fn store_overwrites_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LargeResponseCache::new(dir.path());
        let (path1, _) = cache.store(&[json!(1)]).unwrap();
        let (path2, _) = cache.store(&[json!(2), json!(3)]).unwrap();
        assert_eq!(path1, path2);
        let read_back = cache.read().unwrap();
        assert_eq!(read_back.len(), 2);
    }

    #[test]
    fn cleanup_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LargeResponseCache::new(dir.path());
        let (path, _) = cache.store(&[json!(1)]).unwrap();
        cache.cleanup();
        assert!(!path.exists());
        assert!(cache.current().is_none());
    }
}
