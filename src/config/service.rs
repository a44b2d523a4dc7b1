//! Service descriptors.

use crate::service::options::ServiceOption;
use serde::{Deserialize, Serialize};

/// One installable service as declared in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,

    pub systemd_unit: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Local port the service listens on.
    pub default_target_port: u16,

    /// Port exposed on the onion address. Defaults to the target port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_port: Option<u16>,

    /// Create the onion service before starting the process.
    #[serde(default)]
    pub publish_before_starting: bool,

    /// Shell command run by `install`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ServiceOption>,
}

impl ServiceDescriptor {
    pub fn default_virtual_port(&self) -> u16 {
        self.virtual_port.unwrap_or(self.default_target_port)
    }

    pub fn option(&self, name: &str) -> Option<&ServiceOption> {
        self.options.iter().find(|o| o.name() == name)
    }
}
