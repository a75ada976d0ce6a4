//! Process-wide run lock
//!
//! An advisory exclusive lock on a file keeps two observation runs from
//! overlapping. The lock is held by the [`RunLock`] value and released when
//! it is dropped; the OS releases it if the process dies.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Another run holds the lock at {path} ({holder})")]
    Held { path: PathBuf, holder: String },

    #[error("Lock file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An acquired run lock
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without waiting
    pub fn try_acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LockError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LockError::io(path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(LockError::Held {
                    path: path.to_path_buf(),
                    holder: read_holder(&mut file),
                });
            }
            Err(e) => return Err(LockError::io(path, e)),
        }

        let lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.write_holder()?;
        debug!("Acquired run lock {}", path.display());
        Ok(lock)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_holder(&self) -> Result<(), LockError> {
        write_holder_line(&self.file).map_err(|e| LockError::io(&self.path, e))
    }
}

fn write_holder_line(mut file: &File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(
        file,
        "pid={} started_at={}",
        std::process::id(),
        Utc::now().to_rfc3339()
    )?;
    file.flush()
}

fn read_holder(file: &mut File) -> String {
    let mut contents = String::new();
    match file.read_to_string(&mut contents) {
        Ok(_) if !contents.trim().is_empty() => contents.trim().to_string(),
        _ => "unknown holder".to_string(),
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released run lock {}", self.path.display());
        }
    }
}
