use super::{atomic_write, read_optional, StateDir};
use crate::error::{Error, Result};
use crate::publisher::{OnionKey, OnionService};
use std::fs;

const HOSTNAME_FILE: &str = "hostname";
const PRIVATE_KEY_FILE: &str = "private_key";

/// Onion address and key of each service, so re-enabling republishes the
/// same address.
#[derive(Debug, Clone)]
pub struct KeyStore {
    state: StateDir,
}

impl KeyStore {
    pub fn new(state: StateDir) -> Self {
        Self { state }
    }

    pub fn load(&self, service: &str) -> Result<Option<OnionService>> {
        let dir = self.state.hidden_service_dir(service);
        let hostname = read_optional(&dir.join(HOSTNAME_FILE))?;
        let key = read_optional(&dir.join(PRIVATE_KEY_FILE))?;
        match (hostname, key) {
            (Some(address), Some(key)) => Ok(Some(OnionService {
                address: address.trim().to_string(),
                private_key: OnionKey::new(key.trim()),
            })),
            (None, None) => Ok(None),
            _ => Err(Error::Persistence(format!(
                "Incomplete onion key material in {}",
                dir.display()
            ))),
        }
    }

    pub fn address(&self, service: &str) -> Result<Option<String>> {
        let path = self.state.hidden_service_dir(service).join(HOSTNAME_FILE);
        Ok(read_optional(&path)?.map(|s| s.trim().to_string()))
    }

    pub fn save(&self, service: &str, onion: &OnionService) -> Result<()> {
        let dir = self.state.hidden_service_dir(service);
        fs::create_dir_all(&dir)?;
        restrict_permissions(&dir, 0o700)?;

        let key_path = dir.join(PRIVATE_KEY_FILE);
        atomic_write(&key_path, format!("{}\n", onion.private_key.as_str()).as_bytes())?;
        restrict_permissions(&key_path, 0o600)?;
        atomic_write(
            &dir.join(HOSTNAME_FILE),
            format!("{}\n", onion.address).as_bytes(),
        )
    }

    pub fn remove(&self, service: &str) -> Result<()> {
        let dir = self.state.hidden_service_dir(service);
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

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path, _mode: u32) -> Result<()> {
    Ok(())
}
