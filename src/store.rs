// src/store.rs
//! Walk persistence: the active-walk slot and the archive of finished walks

use crate::{
    error::{Result, WalkError},
    walk::Walk,
};
use serde::de::DeserializeOwned;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Durable storage behind a walk session.
///
/// Loads never fail: unreadable storage reads as empty. Writes replace the
/// whole record, so a reader sees either the previous or the new value.
pub trait WalkStore: Send + Sync + 'static {
    /// The walk that was in progress when the process last stopped, if any.
    fn load_active_walk(&self) -> Option<Walk>;

    fn save_active_walk(&self, walk: &Walk) -> Result<()>;

    fn clear_active_walk(&self) -> Result<()>;

    /// Finished walks, most recent first.
    fn load_archive(&self) -> Vec<Walk>;

    fn save_archive(&self, walks: &[Walk]) -> Result<()>;

    /// Remove one walk from the archive. Unknown ids are a no-op.
    fn delete_walk(&self, id: &str) -> Result<()> {
        let mut walks = self.load_archive();
        let before = walks.len();
        walks.retain(|w| w.id != id);
        if walks.len() == before {
            return Ok(());
        }
        self.save_archive(&walks)
    }
}

const ACTIVE_FILE: &str = "active_walk.json";
const ARCHIVE_FILE: &str = "walks.json";

/// JSON files in a data directory, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            WalkError::Storage(format!("Failed to create data directory {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.dir.join(name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write to a uniquely named temporary file beside the target, then
    /// persist it over the target.
    fn write_atomic(&self, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.dir.join(name);
        let storage_error =
            |e: std::io::Error| WalkError::Storage(format!("Failed to write {}: {}", path.display(), e));

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(storage_error)?;
        tmp.as_file_mut().write_all(contents).map_err(storage_error)?;
        tmp.as_file().sync_all().map_err(storage_error)?;
        tmp.persist(&path).map_err(|e| storage_error(e.error))?;

        debug!("Wrote {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }
}

impl WalkStore for JsonFileStore {
    fn load_active_walk(&self) -> Option<Walk> {
        self.read_json(ACTIVE_FILE)
    }

    fn save_active_walk(&self, walk: &Walk) -> Result<()> {
        let contents = serde_json::to_vec(walk)?;
        self.write_atomic(ACTIVE_FILE, &contents)
    }

    fn clear_active_walk(&self) -> Result<()> {
        let path = self.dir.join(ACTIVE_FILE);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WalkError::Storage(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn load_archive(&self) -> Vec<Walk> {
        self.read_json(ARCHIVE_FILE).unwrap_or_default()
    }

    fn save_archive(&self, walks: &[Walk]) -> Result<()> {
        let contents = serde_json::to_vec_pretty(walks)?;
        self.write_atomic(ARCHIVE_FILE, &contents)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    active: Option<Walk>,
    archive: Vec<Walk>,
    fail_writes: bool,
}

/// Volatile store. Clones share contents, which lets a test "restart" a
/// session on the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn writable(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        let state = self.lock();
        if state.fail_writes {
            return Err(WalkError::Storage("Simulated write failure".to_string()));
        }
        Ok(state)
    }
}

impl WalkStore for MemoryStore {
    fn load_active_walk(&self) -> Option<Walk> {
        self.lock().active.clone()
    }

    fn save_active_walk(&self, walk: &Walk) -> Result<()> {
        self.writable()?.active = Some(walk.clone());
        Ok(())
    }

    fn clear_active_walk(&self) -> Result<()> {
        self.writable()?.active = None;
        Ok(())
    }

    fn load_archive(&self) -> Vec<Walk> {
        self.lock().archive.clone()
    }

    fn save_archive(&self, walks: &[Walk]) -> Result<()> {
        self.writable()?.archive = walks.to_vec();
        Ok(())
    }
}
