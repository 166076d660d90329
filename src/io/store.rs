//! Load/save of the task file.
//!
//! Startup loading never fails: anything unreadable yields an empty list so
//! the panel always opens. Reloads and CLI edits use the fallible loader so a
//! damaged file is never replaced by an empty list. Saving never raises to
//! the caller; a failed write is logged and dropped, and the in-memory
//! sequence stays authoritative until the next save succeeds.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tempfile::NamedTempFile;

use crate::io::lock::{FileLock, LockError};
use crate::model::task::Task;

/// How long after a local save file-change notifications are ignored.
pub const SELF_SAVE_DEBOUNCE: Duration = Duration::from_secs(5);

/// Error type for task file reads and writes
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not read {path}: {source}")]
    ReadError { path: PathBuf, source: io::Error },
    #[error("could not parse {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("could not write {path}: {source}")]
    WriteError { path: PathBuf, source: io::Error },
    #[error("could not serialize tasks: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error(transparent)]
    Lock(#[from] LockError),
}

// ---------------------------------------------------------------------------
// Plain file functions
// ---------------------------------------------------------------------------

/// Read the task list from `path`. A missing file is an empty list; an
/// unreadable or undecodable one is an error.
pub fn try_load_tasks(path: &Path) -> Result<Vec<Task>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StoreError::ReadError {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    serde_json::from_str(&content).map_err(|e| StoreError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read the task list from `path`. Missing, unreadable or malformed files
/// all produce an empty list.
pub fn load_tasks(path: &Path) -> Vec<Task> {
    try_load_tasks(path).unwrap_or_else(|e| {
        log::warn!("{}", e);
        Vec::new()
    })
}

/// Serialize the full list: pretty-printed, two-space indented, UTF-8.
pub fn serialize_tasks(tasks: &[Task]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(tasks)
}

/// Write the task list to `path` atomically, creating parent directories.
pub fn save_tasks(path: &Path, tasks: &[Task]) -> Result<(), StoreError> {
    let content = serialize_tasks(tasks)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| StoreError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    atomic_write(path, content.as_bytes()).map_err(|e| StoreError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Write `content` to `path` atomically using a temp file + rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

// ---------------------------------------------------------------------------
// TaskStore
// ---------------------------------------------------------------------------

/// The task file plus the bookkeeping needed to tell our own writes apart
/// from external edits.
pub struct TaskStore {
    path: PathBuf,
    /// Held for the store's lifetime by one-shot commands
    held_lock: Option<FileLock>,
    last_saved: Option<Instant>,
    known_mtime: Option<SystemTime>,
}

impl TaskStore {
    /// Open a store that takes the file lock only for the duration of each save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let known_mtime = modified_time(&path);
        TaskStore {
            path,
            held_lock: None,
            last_saved: None,
            known_mtime,
        }
    }

    /// Open a store holding the file lock until dropped, so a whole
    /// load-modify-save cycle is exclusive.
    pub fn open_locked(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        let lock = FileLock::acquire_default(&path)?;
        let mut store = TaskStore::open(path);
        store.held_lock = Some(lock);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&mut self) -> Vec<Task> {
        self.known_mtime = modified_time(&self.path);
        load_tasks(&self.path)
    }

    /// Like [`TaskStore::load`], but a file that exists and does not decode
    /// is reported instead of read as empty.
    pub fn try_load(&mut self) -> Result<Vec<Task>, StoreError> {
        self.known_mtime = modified_time(&self.path);
        try_load_tasks(&self.path)
    }

    /// Persist the sequence. Returns false (after logging) if the write was
    /// dropped; never panics or propagates.
    pub fn save(&mut self, tasks: &[Task]) -> bool {
        match self.try_save(tasks) {
            Ok(()) => {
                self.last_saved = Some(Instant::now());
                self.known_mtime = modified_time(&self.path);
                log::debug!("saved {} tasks to {}", tasks.len(), self.path.display());
                true
            }
            Err(e) => {
                log::warn!("save dropped: {}", e);
                false
            }
        }
    }

    fn try_save(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let _guard = match self.held_lock {
            Some(_) => None,
            None => Some(FileLock::acquire_default(&self.path)?),
        };
        save_tasks(&self.path, tasks)
    }

    pub fn last_saved(&self) -> Option<Instant> {
        self.last_saved
    }

    /// Whether `now` falls inside the window after a local save during which
    /// change notifications are assumed to be our own write.
    pub fn recently_saved(&self, now: Instant) -> bool {
        self.last_saved
            .is_some_and(|t| now.duration_since(t) < SELF_SAVE_DEBOUNCE)
    }

    /// Reload if the file changed on disk since we last read or wrote it.
    /// Returns `None` during the self-save debounce window, when the
    /// modification time is unchanged, or when the new content does not
    /// decode (a half-written or hand-broken file keeps the current list).
    pub fn reload_if_changed(&mut self, now: Instant) -> Option<Vec<Task>> {
        if self.recently_saved(now) {
            return None;
        }
        let current = modified_time(&self.path)?;
        if self.known_mtime == Some(current) {
            return None;
        }
        log::info!("{} changed on disk, reloading", self.path.display());
        match self.try_load() {
            Ok(tasks) => Some(tasks),
            Err(e) => {
                log::warn!("keeping the current list: {}", e);
                None
            }
        }
    }
}
