//! Cross-process exclusion for one task file.
//!
//! Every CLI mutation holds the lock across its whole load-modify-save
//! cycle, and the panel takes it for each save, so two writers never
//! interleave and no edit is lost to a stale read. The lock is an
//! advisory `flock` on a hidden sibling file (`.tasks.json.lock`). That
//! file is created on first use and left in place: it carries no data,
//! and unlinking it while another process waits on the old inode would
//! let a third process lock a fresh file alongside the holder.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How long a writer waits for another tasker process before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

const RETRY_EVERY: Duration = Duration::from_millis(10);

/// Exclusive hold on a task file. Released when dropped.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not create lock file at {path}: {source}")]
    CreateError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not acquire lock on {path}: another tasker process may be writing")]
    Timeout { path: PathBuf },
}

/// The lock file that guards `data_file`: a hidden sibling named after it.
pub fn lock_path_for(data_file: &Path) -> PathBuf {
    let name = data_file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tasks.json");
    data_file.with_file_name(format!(".{}.lock", name))
}

impl FileLock {
    /// Lock `data_file`, polling until `timeout` runs out.
    ///
    /// The task file itself need not exist yet; its directory is created
    /// so a first `add` can lock before anything has been saved.
    pub fn acquire(data_file: &Path, timeout: Duration) -> Result<Self, LockError> {
        let lock_path = lock_path_for(data_file);
        let create_error = |source: std::io::Error| LockError::CreateError {
            path: lock_path.clone(),
            source,
        };
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(create_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(create_error)?;

        let start = Instant::now();
        while let Err(e) = try_lock(&file) {
            if start.elapsed() >= timeout {
                log::debug!("gave up on {} after {:?}: {}", lock_path.display(), timeout, e);
                return Err(LockError::Timeout { path: lock_path });
            }
            std::thread::sleep(RETRY_EVERY);
        }
        Ok(FileLock {
            _file: file,
            path: lock_path,
        })
    }

    pub fn acquire_default(data_file: &Path) -> Result<Self, LockError> {
        Self::acquire(data_file, DEFAULT_LOCK_TIMEOUT)
    }

    /// Path of the lock file (not the task file).
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> Result<(), std::io::Error> {
    use std::os::unix::io::AsRawFd;
    // Closing the descriptor on drop releases the flock
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// No advisory locking here: writers are not excluded from each other.
#[cfg(not(unix))]
fn try_lock(_file: &File) -> Result<(), std::io::Error> {
    Ok(())
}
