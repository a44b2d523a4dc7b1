//! A configured service: its descriptor plus the state stored for it.

mod installer;
pub mod options;

pub use installer::{CommandInstaller, PackageInstaller};
pub use options::{BuiltinOption, LogCleanup, OptionCleanup, OptionValue, ServiceOption};

use crate::config::ServiceDescriptor;
use crate::error::{Error, Result};
use crate::persistence::{KeyStore, OptionStore};
use tracing::warn;

pub struct Service {
    descriptor: ServiceDescriptor,
    options: OptionStore,
    keys: KeyStore,
}

impl Service {
    pub fn new(descriptor: ServiceDescriptor, options: OptionStore, keys: KeyStore) -> Self {
        Self {
            descriptor,
            options,
            keys,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn unit(&self) -> &str {
        &self.descriptor.systemd_unit
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn publish_before_starting(&self) -> bool {
        self.descriptor.publish_before_starting
    }

    pub(crate) fn option_store(&self) -> &OptionStore {
        &self.options
    }

    pub(crate) fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    /// Declared option by name.
    pub fn option(&self, name: &str) -> Result<&ServiceOption> {
        self.descriptor
            .option(name)
            .ok_or_else(|| Error::UnknownOption {
                service: self.name().to_string(),
                option: name.to_string(),
            })
    }

    /// Stored value, or the default when nothing (valid) is stored.
    pub fn option_value(&self, name: &str) -> Result<OptionValue> {
        let option = self.option(name)?;
        Ok(self.resolve(option, self.options.get(self.name(), name)?))
    }

    /// Every declared option with its current value, in declaration order.
    pub fn option_values(&self) -> Result<Vec<(ServiceOption, OptionValue)>> {
        let mut stored = self.options.load(self.name())?;
        Ok(self
            .descriptor
            .options
            .iter()
            .map(|option| {
                let value = self.resolve(option, stored.remove(option.name()));
                (option.clone(), value)
            })
            .collect())
    }

    fn resolve(&self, option: &ServiceOption, stored: Option<OptionValue>) -> OptionValue {
        match stored {
            Some(value) if option.accepts(&value) => value,
            Some(value) => {
                warn!(
                    service = %self.name(),
                    option = %option.name(),
                    ?value,
                    "Ignoring stored value of the wrong kind"
                );
                option.default_value(&self.descriptor)
            }
            None => option.default_value(&self.descriptor),
        }
    }

    fn builtin_port(&self, builtin: BuiltinOption, fallback: u16) -> Result<u16> {
        if self.descriptor.option(builtin.name()).is_none() {
            return Ok(fallback);
        }
        match self.option_value(builtin.name())? {
            OptionValue::Port(port) => Ok(port),
            _ => Ok(fallback),
        }
    }

    pub fn virtual_port(&self) -> Result<u16> {
        self.builtin_port(BuiltinOption::VirtualPort, self.descriptor.default_virtual_port())
    }

    pub fn target_port(&self) -> Result<u16> {
        self.builtin_port(BuiltinOption::TargetPort, self.descriptor.default_target_port)
    }

    /// Whether the service should be enabled once Tor bootstraps.
    pub fn autostart(&self) -> Result<bool> {
        if self.descriptor.option(BuiltinOption::Autostart.name()).is_none() {
            return Ok(false);
        }
        Ok(self.option_value(BuiltinOption::Autostart.name())? == OptionValue::Bool(true))
    }

    /// Onion address, if one was ever created.
    pub fn address(&self) -> Result<Option<String>> {
        self.keys.address(self.name())
    }

    /// What a client needs to connect, or `None` without an address.
    ///
    /// ```text
    /// Address: abcdef.onion:64738
    /// Server Password: hunter2
    /// ```
    pub fn connection_info(&self) -> Result<Option<String>> {
        let Some(address) = self.address()? else {
            return Ok(None);
        };
        let mut info = format!("Address: {}:{}", address, self.virtual_port()?);
        for (option, value) in self.option_values()? {
            if option.is_masked() {
                info.push_str(&format!("\n{}: {}", title_case(option.name()), value));
            }
        }
        Ok(Some(info))
    }
}

/// "server-password" -> "Server Password"
fn title_case(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
