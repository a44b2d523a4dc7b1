//! Per-service options.
//!
//! Each option is one variant of [`ServiceOption`]; rendering, parsing and
//! defaults dispatch on the variant.

use crate::config::ServiceDescriptor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

const MASK: &str = "********";

/// Options every service may enable without declaring their semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltinOption {
    VirtualPort,
    TargetPort,
    Autostart,
    /// Stored and reported only. Applying it is left to the firewall that
    /// reads the option store; nothing here opens ports.
    AllowLocalhost,
    /// Stored and reported only, like `AllowLocalhost`.
    AllowLan,
}

impl BuiltinOption {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinOption::VirtualPort => "virtual-port",
            BuiltinOption::TargetPort => "target-port",
            BuiltinOption::Autostart => "autostart",
            BuiltinOption::AllowLocalhost => "allow-localhost",
            BuiltinOption::AllowLan => "allow-lan",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BuiltinOption::VirtualPort => "Port opened on the onion service",
            BuiltinOption::TargetPort => "Local port the service listens on",
            BuiltinOption::Autostart => "Start service automatically after bootstrapping Tor",
            BuiltinOption::AllowLocalhost => "Allow connections from localhost",
            BuiltinOption::AllowLan => "Allow connections from the local network",
        }
    }

    fn is_port(&self) -> bool {
        matches!(self, BuiltinOption::VirtualPort | BuiltinOption::TargetPort)
    }
}

/// A declared option of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceOption {
    Boolean {
        name: String,
        #[serde(default)]
        default: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Text {
        name: String,
        #[serde(default)]
        default: String,
        #[serde(default)]
        masked: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Builtin {
        name: BuiltinOption,
    },
}

/// A stored option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Port(u16),
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Port(p) => write!(f, "{}", p),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

impl ServiceOption {
    pub fn name(&self) -> &str {
        match self {
            ServiceOption::Boolean { name, .. } | ServiceOption::Text { name, .. } => name,
            ServiceOption::Builtin { name } => name.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ServiceOption::Boolean { description, .. }
            | ServiceOption::Text { description, .. } => description.as_deref().unwrap_or(""),
            ServiceOption::Builtin { name } => name.description(),
        }
    }

    pub fn builtin(&self) -> Option<BuiltinOption> {
        match self {
            ServiceOption::Builtin { name } => Some(*name),
            _ => None,
        }
    }

    pub fn is_masked(&self) -> bool {
        matches!(self, ServiceOption::Text { masked: true, .. })
    }

    /// Value used until the user stores one.
    pub fn default_value(&self, descriptor: &ServiceDescriptor) -> OptionValue {
        match self {
            ServiceOption::Boolean { default, .. } => OptionValue::Bool(*default),
            ServiceOption::Text { default, .. } => OptionValue::Text(default.clone()),
            ServiceOption::Builtin { name } => match name {
                BuiltinOption::VirtualPort => OptionValue::Port(descriptor.default_virtual_port()),
                BuiltinOption::TargetPort => OptionValue::Port(descriptor.default_target_port),
                BuiltinOption::Autostart
                | BuiltinOption::AllowLocalhost
                | BuiltinOption::AllowLan => OptionValue::Bool(false),
            },
        }
    }

    /// Parse a value typed by the user.
    pub fn parse_value(&self, raw: &str) -> Result<OptionValue> {
        match self {
            ServiceOption::Boolean { .. } => parse_bool(self.name(), raw),
            ServiceOption::Builtin { name } if !name.is_port() => parse_bool(self.name(), raw),
            ServiceOption::Builtin { .. } => {
                let port = raw.trim().parse::<u16>().ok().filter(|p| *p != 0);
                port.map(OptionValue::Port)
                    .ok_or_else(|| Error::InvalidOptionValue {
                        option: self.name().to_string(),
                        reason: format!("'{}' is not a port between 1 and 65535", raw),
                    })
            }
            ServiceOption::Text { .. } => {
                check_text(self.name(), raw)?;
                Ok(OptionValue::Text(raw.to_string()))
            }
        }
    }

    /// Check that a value loaded from storage fits this option's kind.
    pub fn accepts(&self, value: &OptionValue) -> bool {
        match (self, value) {
            (ServiceOption::Boolean { .. }, OptionValue::Bool(_)) => true,
            (ServiceOption::Text { .. }, OptionValue::Text(s)) => !s.contains('\n'),
            (ServiceOption::Builtin { name }, OptionValue::Port(p)) => name.is_port() && *p != 0,
            (ServiceOption::Builtin { name }, OptionValue::Bool(_)) => !name.is_port(),
            _ => false,
        }
    }

    /// Display string for a value.
    pub fn render(&self, value: &OptionValue) -> String {
        match (self, value) {
            (ServiceOption::Text { masked: true, .. }, OptionValue::Text(s)) if !s.is_empty() => {
                MASK.to_string()
            }
            (ServiceOption::Builtin { .. } | ServiceOption::Boolean { .. }, OptionValue::Bool(b)) => {
                let state = if *b { "on" } else { "off" };
                state.to_string()
            }
            (_, value) => value.to_string(),
        }
    }
}

fn parse_bool(option: &str, raw: &str) -> Result<OptionValue> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" => Ok(OptionValue::Bool(true)),
        "false" | "off" | "no" => Ok(OptionValue::Bool(false)),
        _ => Err(Error::InvalidOptionValue {
            option: option.to_string(),
            reason: format!("'{}' is not one of: true, false", raw),
        }),
    }
}

pub(crate) fn check_text(option: &str, value: &str) -> Result<()> {
    if value.contains('\n') || value.contains('\r') {
        return Err(Error::InvalidOptionValue {
            option: option.to_string(),
            reason: "value must be a single line".to_string(),
        });
    }
    Ok(())
}

/// Hook run for every stored option when its service is uninstalled.
#[async_trait]
pub trait OptionCleanup: Send + Sync {
    async fn clean_up(&self, service: &str, option: &ServiceOption, value: &OptionValue)
        -> Result<()>;
}

/// Default cleanup: nothing outside the state directory to undo.
pub struct LogCleanup;

#[async_trait]
impl OptionCleanup for LogCleanup {
    async fn clean_up(
        &self,
        service: &str,
        option: &ServiceOption,
        value: &OptionValue,
    ) -> Result<()> {
        info!(
            service = %service,
            option = %option.name(),
            value = %option.render(value),
            "Cleaning up option"
        );
        Ok(())
    }
}
