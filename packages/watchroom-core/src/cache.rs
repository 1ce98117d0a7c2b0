//! Local durability for the room queue.
//!
//! The queue is written after every accepted change so a peer that reloads
//! mid-session shows the last known queue before the owner's reconciliation
//! arrives. Keys are `"queue:" + roomId`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{RoomError, RoomResult};
use crate::state::QueueItem;

/// Key/value store for serialized queues.
pub trait QueueCache: Send + Sync {
    /// Reads the queue stored under `key`, if any.
    fn load(&self, key: &str) -> RoomResult<Option<Vec<QueueItem>>>;

    /// Overwrites the queue stored under `key`.
    fn store(&self, key: &str, items: &[QueueItem]) -> RoomResult<()>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileQueueCache {
    dir: PathBuf,
}

impl FileQueueCache {
    /// Creates a cache rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_stem: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_stem))
    }
}

impl QueueCache for FileQueueCache {
    fn load(&self, key: &str) -> RoomResult<Option<Vec<QueueItem>>> {
        let path = self.path_for(key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RoomError::Cache(format!("{}: {}", path.display(), e))),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| RoomError::Cache(format!("{}: {}", path.display(), e)))
    }

    /// Uses atomic write (temp file + rename) so a crash never leaves a
    /// truncated queue behind.
    fn store(&self, key: &str, items: &[QueueItem]) -> RoomResult<()> {
        let io_err = |e: std::io::Error| RoomError::Cache(e.to_string());

        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        let path = self.path_for(key);
        let temp_path = path.with_extension("json.tmp");
        let contents =
            serde_json::to_string_pretty(items).map_err(|e| RoomError::Cache(e.to_string()))?;

        std::fs::write(&temp_path, contents).map_err(io_err)?;
        std::fs::rename(&temp_path, &path).map_err(io_err)
    }
}

/// Process-local cache, for tests and embedders without a writable disk.
#[derive(Debug, Default)]
pub struct MemoryQueueCache {
    entries: Mutex<HashMap<String, Vec<QueueItem>>>,
}

impl MemoryQueueCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueCache for MemoryQueueCache {
    fn load(&self, key: &str) -> RoomResult<Option<Vec<QueueItem>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn store(&self, key: &str, items: &[QueueItem]) -> RoomResult<()> {
        self.entries.lock().insert(key.to_string(), items.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_constants::queue_cache_key;
    use crate::state::{Participant, VideoCandidate};

    fn sample_queue() -> Vec<QueueItem> {
        vec![QueueItem::from_candidate(
            &VideoCandidate::new("Intro", "https://v/intro", ""),
            Participant::new("c", "Carol", ""),
        )]
    }

    #[test]
    fn file_cache_round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileQueueCache::new(dir.path().join("cache"));
        let key = queue_cache_key("r1");

        assert_eq!(cache.load(&key).unwrap(), None);

        cache.store(&key, &sample_queue()).unwrap();
        assert_eq!(cache.load(&key).unwrap(), Some(sample_queue()));

        cache.store(&key, &[]).unwrap();
        assert_eq!(cache.load(&key).unwrap(), Some(vec![]));
        assert!(!cache.path_for(&key).with_extension("json.tmp").exists());
    }

    #[test]
    fn file_cache_reports_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileQueueCache::new(dir.path());
        let key = queue_cache_key("r1");
        std::fs::write(cache.path_for(&key), "{not json").unwrap();

        assert!(matches!(cache.load(&key), Err(RoomError::Cache(_))));
    }

    #[test]
    fn file_names_are_sanitised() {
        let cache = FileQueueCache::new("/tmp/x");
        let path = cache.path_for("queue:r/../1");
        assert_eq!(path.file_name().unwrap(), "queue_r____1.json");
    }

    #[test]
    fn memory_cache_is_keyed_by_room() {
        let cache = MemoryQueueCache::new();
        cache.store(&queue_cache_key("r1"), &sample_queue()).unwrap();
        assert!(cache.load(&queue_cache_key("r2")).unwrap().is_none());
        assert_eq!(cache.load(&queue_cache_key("r1")).unwrap().unwrap().len(), 1);
    }
}
