//! Root configuration structure.

use super::{parse_duration_string, ServiceDescriptor};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STATE_DIR: &str = "/var/lib/tails-server";
pub const DEFAULT_TOR_BOOTSTRAPPED_TARGET: &str = "tails-tor-has-bootstrapped.target";
pub const DEFAULT_TOR_CONTROL_SOCKET: &str = "/var/run/tor/control";

pub const DEFAULT_TOR_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SUPERVISOR_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Root configuration structure for tails-server.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Installed set, per-service options and onion keys live here.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Unit that becomes active once Tor has bootstrapped.
    #[serde(default = "default_bootstrapped_target")]
    pub tor_bootstrapped_target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tor_control_socket: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tor_control_port: Option<u16>,

    /// Only for a password-protected control port. Cookie and null
    /// authentication are negotiated without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tor_control_password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tor_poll_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_interval: Option<String>,

    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_bootstrapped_target() -> String {
    DEFAULT_TOR_BOOTSTRAPPED_TARGET.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            tor_bootstrapped_target: default_bootstrapped_target(),
            tor_control_socket: None,
            tor_control_port: None,
            tor_control_password: None,
            tor_poll_interval: None,
            supervisor_timeout: None,
            publish_timeout: None,
            watch_interval: None,
            services: Vec::new(),
        }
    }
}

/// Where the Tor control port listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorControlEndpoint {
    Socket(PathBuf),
    Port(u16),
}

/// Bounds and intervals for the runtime, resolved from the config strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub tor_poll_interval: Duration,
    pub supervisor_timeout: Duration,
    pub publish_timeout: Duration,
    pub watch_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            tor_poll_interval: DEFAULT_TOR_POLL_INTERVAL,
            supervisor_timeout: DEFAULT_SUPERVISOR_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            watch_interval: DEFAULT_WATCH_INTERVAL,
        }
    }
}

impl Config {
    pub fn service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    /// The socket wins when both a socket and a port are configured.
    pub fn tor_control(&self) -> TorControlEndpoint {
        match (&self.tor_control_socket, self.tor_control_port) {
            (Some(path), _) => TorControlEndpoint::Socket(path.clone()),
            (None, Some(port)) => TorControlEndpoint::Port(port),
            (None, None) => TorControlEndpoint::Socket(PathBuf::from(DEFAULT_TOR_CONTROL_SOCKET)),
        }
    }

    pub fn timings(&self) -> Result<Timings> {
        let defaults = Timings::default();
        Ok(Timings {
            tor_poll_interval: duration_field(
                "tor_poll_interval",
                &self.tor_poll_interval,
                defaults.tor_poll_interval,
            )?,
            supervisor_timeout: duration_field(
                "supervisor_timeout",
                &self.supervisor_timeout,
                defaults.supervisor_timeout,
            )?,
            publish_timeout: duration_field(
                "publish_timeout",
                &self.publish_timeout,
                defaults.publish_timeout,
            )?,
            watch_interval: duration_field(
                "watch_interval",
                &self.watch_interval,
                defaults.watch_interval,
            )?,
        })
    }
}

fn duration_field(field: &str, value: &Option<String>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(raw) => parse_duration_string(raw).ok_or_else(|| {
            Error::Validation(format!(
                "'{}' has invalid duration '{}'. Use formats like '5s', '30s', '1m', '500ms'",
                field, raw
            ))
        }),
    }
}
