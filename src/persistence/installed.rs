use super::{atomic_write, read_optional};
use crate::error::{Error, Result};
use crate::lock_order::{LockId, Tracked};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Process-wide set of installed services.
pub trait InstalledStore: Send + Sync {
    fn installed_services(&self) -> Result<BTreeSet<String>>;

    fn set_installed(&self, service: &str, installed: bool) -> Result<()>;

    fn is_installed(&self, service: &str) -> Result<bool> {
        Ok(self.installed_services()?.contains(service))
    }
}

/// Installed set kept as a YAML list. Read-modify-write happens under one lock.
pub struct YamlInstalledStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl YamlInstalledStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeSet<String>> {
        match read_optional(&self.path)? {
            None => Ok(BTreeSet::new()),
            Some(content) if content.trim().is_empty() => Ok(BTreeSet::new()),
            Some(content) => serde_yaml::from_str(&content).map_err(|e| {
                Error::Persistence(format!(
                    "Corrupt installed-services file {}: {}",
                    self.path.display(),
                    e
                ))
            }),
        }
    }
}

impl InstalledStore for YamlInstalledStore {
    fn installed_services(&self) -> Result<BTreeSet<String>> {
        let _order = Tracked::acquire(LockId::InstalledSet);
        let _guard = self.lock.lock();
        self.read()
    }

    fn set_installed(&self, service: &str, installed: bool) -> Result<()> {
        let _order = Tracked::acquire(LockId::InstalledSet);
        let _guard = self.lock.lock();

        let mut services = self.read()?;
        let changed = if installed {
            services.insert(service.to_string())
        } else {
            services.remove(service)
        };
        if !changed {
            return Ok(());
        }

        debug!(service = %service, installed, "Updating installed-services file");
        let yaml = serde_yaml::to_string(&services)?;
        atomic_write(&self.path, yaml.as_bytes())
    }
}
