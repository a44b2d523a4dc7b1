use super::{atomic_write, read_optional, StateDir};
use crate::error::{Error, Result};
use crate::service::options::OptionValue;
use std::collections::BTreeMap;
use std::fs;

/// Stored option values, one YAML map per service.
#[derive(Debug, Clone)]
pub struct OptionStore {
    state: StateDir,
}

impl OptionStore {
    pub fn new(state: StateDir) -> Self {
        Self { state }
    }

    pub fn load(&self, service: &str) -> Result<BTreeMap<String, OptionValue>> {
        let path = self.state.options_file(service);
        match read_optional(&path)? {
            None => Ok(BTreeMap::new()),
            Some(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Some(content) => serde_yaml::from_str(&content).map_err(|e| {
                Error::Persistence(format!("Corrupt options file {}: {}", path.display(), e))
            }),
        }
    }

    pub fn get(&self, service: &str, option: &str) -> Result<Option<OptionValue>> {
        Ok(self.load(service)?.remove(option))
    }

    pub fn set(&self, service: &str, option: &str, value: OptionValue) -> Result<()> {
        let mut values = self.load(service)?;
        values.insert(option.to_string(), value);
        self.store(service, &values)
    }

    /// Forget a stored value so the default applies again.
    pub fn remove(&self, service: &str, option: &str) -> Result<()> {
        let mut values = self.load(service)?;
        if values.remove(option).is_some() {
            self.store(service, &values)?;
        }
        Ok(())
    }

    pub fn clear(&self, service: &str) -> Result<()> {
        let path = self.state.options_file(service);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn store(&self, service: &str, values: &BTreeMap<String, OptionValue>) -> Result<()> {
        let yaml = serde_yaml::to_string(values)?;
        atomic_write(&self.state.options_file(service), yaml.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_values_keep_their_kind() {
        let temp = TempDir::new().unwrap();
        let store = OptionStore::new(StateDir::new(temp.path()));

        store.set("mumble", "autostart", OptionValue::Bool(true)).unwrap();
        store.set("mumble", "virtual-port", OptionValue::Port(64738)).unwrap();
        store
            .set("mumble", "server-password", OptionValue::Text("hunter2".into()))
            .unwrap();

        let values = store.load("mumble").unwrap();
        assert_eq!(values["autostart"], OptionValue::Bool(true));
        assert_eq!(values["virtual-port"], OptionValue::Port(64738));
        assert_eq!(values["server-password"], OptionValue::Text("hunter2".into()));
    }

    #[test]
    fn test_remove_and_clear() {
        let temp = TempDir::new().unwrap();
        let store = OptionStore::new(StateDir::new(temp.path()));

        store.set("gobby", "autostart", OptionValue::Bool(true)).unwrap();
        store.remove("gobby", "autostart").unwrap();
        assert_eq!(store.get("gobby", "autostart").unwrap(), None);

        store.set("gobby", "allow-lan", OptionValue::Bool(false)).unwrap();
        store.clear("gobby").unwrap();
        assert!(store.load("gobby").unwrap().is_empty());
        store.clear("gobby").unwrap();
    }
}
