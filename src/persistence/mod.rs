//! On-disk state under the configured `state_dir`.
//!
//! ```text
//! <state_dir>/
//! ├── .lock                        single-instance lock
//! ├── installed.yml                installed-services set
//! └── <service>/
//!     ├── options                  option values (YAML map)
//!     └── hidden_service/
//!         ├── hostname
//!         └── private_key
//! ```

mod installed;
mod instance;
mod keys;
mod options;

pub use installed::{InstalledStore, YamlInstalledStore};
pub use instance::InstanceLock;
pub use keys::KeyStore;
pub use options::OptionStore;

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const INSTALLED_FILE: &str = "installed.yml";
const LOCK_FILE: &str = ".lock";
const OPTIONS_FILE: &str = "options";
const HIDDEN_SERVICE_DIR: &str = "hidden_service";

/// Path layout of the state directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn installed_file(&self) -> PathBuf {
        self.root.join(INSTALLED_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn service_dir(&self, service: &str) -> PathBuf {
        self.root.join(service)
    }

    pub fn options_file(&self, service: &str) -> PathBuf {
        self.service_dir(service).join(OPTIONS_FILE)
    }

    pub fn hidden_service_dir(&self, service: &str) -> PathBuf {
        self.service_dir(service).join(HIDDEN_SERVICE_DIR)
    }

    /// Delete everything stored for a service. Missing state is not an error.
    pub fn remove_service(&self, service: &str) -> Result<()> {
        let dir = self.service_dir(service);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!(
                "Failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }
}

/// Write-then-rename so readers never see a half-written file.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let persistence_err =
        |what: &str, e: std::io::Error| Error::Persistence(format!("{} {}: {}", what, path.display(), e));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| persistence_err("Failed to create parent of", e))?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file =
        fs::File::create(&temp_path).map_err(|e| persistence_err("Failed to create temp file for", e))?;
    file.write_all(contents)
        .map_err(|e| persistence_err("Failed to write", e))?;
    file.sync_all()
        .map_err(|e| persistence_err("Failed to sync", e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| persistence_err("Failed to replace", e))
}

/// Read a file, treating a missing file as `None`.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Persistence(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}
