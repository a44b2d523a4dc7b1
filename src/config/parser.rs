use super::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "tails-server.yaml";
const ALT_CONFIG_FILE_NAME: &str = "tails-server.yml";

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_config_in_dir(&current_dir)
    }

    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        for name in [CONFIG_FILE_NAME, ALT_CONFIG_FILE_NAME] {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        match dir.parent() {
            Some(parent) => Self::find_config_in_dir(parent),
            None => Err(Error::Config(format!(
                "Could not find {} in current directory or any parent",
                CONFIG_FILE_NAME
            ))),
        }
    }

    /// Load and validate a config file.
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config = self.parse_config(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a YAML string without validating it.
    pub fn parse_config(&self, content: &str) -> Result<Config> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
