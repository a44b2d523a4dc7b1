use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive advisory lock held for the lifetime of a managing process.
///
/// Two processes driving the same units would race on supervisor events, so
/// only one may hold this at a time. Released when dropped.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _file: File,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                Error::Persistence(format!("Failed to open lock file {}: {}", path.display(), e))
            })?;

        if let Err(e) = file.try_lock_exclusive() {
            debug!("Lock acquisition failed: {} (kind: {:?})", e, e.kind());
            let owner = std::fs::read_to_string(path).unwrap_or_default();
            let owner = owner.trim();
            return Err(Error::Persistence(if owner.is_empty() {
                "another instance of tails-server is running".to_string()
            } else {
                format!("another instance of tails-server is running (PID {})", owner)
            }));
        }

        // PID for diagnostics only
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        debug!("Acquired instance lock on {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
