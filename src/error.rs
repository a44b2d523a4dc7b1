// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Service '{0}' is not installed")]
    #[diagnostic(
        code(tails_server::service::not_installed),
        help("Install the service first with: tails-server install {0}")
    )]
    NotInstalled(String),

    #[error("Service '{0}' is already installed")]
    #[diagnostic(code(tails_server::service::already_installed))]
    AlreadyInstalled(String),

    #[error("Service '{0}' is already enabled")]
    #[diagnostic(code(tails_server::service::already_enabled))]
    AlreadyEnabled(String),

    #[error("Tor is not running")]
    #[diagnostic(
        code(tails_server::tor::not_running),
        help("Wait until Tor has bootstrapped, then try again")
    )]
    TorIsNotRunning,

    #[error("Invalid {category} substate: '{value}'")]
    #[diagnostic(code(tails_server::status::invalid_substate))]
    InvalidSubstate { category: String, value: String },

    #[error("Invalid {category} transition: {from} -> {to}")]
    #[diagnostic(code(tails_server::status::invalid_transition))]
    InvalidTransition {
        category: String,
        from: String,
        to: String,
    },

    #[error("Invalid status: {0}")]
    #[diagnostic(code(tails_server::status::invalid))]
    InvalidStatus(String),

    #[error("Service not found: {0}")]
    #[diagnostic(
        code(tails_server::service::not_found),
        help("List known services with `tails-server status`")
    )]
    ServiceNotFound(String),

    #[error("Service '{service}' has no option '{option}'")]
    #[diagnostic(code(tails_server::option::unknown))]
    UnknownOption { service: String, option: String },

    #[error("Invalid value for option '{option}': {reason}")]
    #[diagnostic(code(tails_server::option::invalid_value))]
    InvalidOptionValue { option: String, reason: String },

    #[error("Service '{0}' failed to start: {1}")]
    #[diagnostic(
        code(tails_server::service::start_failed),
        help("See `systemctl status` and `journalctl -xn` for details")
    )]
    ServiceStartFailed(String, String),

    #[error("Process supervisor error: {0}")]
    #[diagnostic(code(tails_server::supervisor::error))]
    Supervisor(String),

    #[error("Hidden service error: {0}")]
    #[diagnostic(code(tails_server::publisher::error))]
    Publisher(String),

    #[error("Tor control error: {0}")]
    #[diagnostic(
        code(tails_server::tor::control),
        help("Check that the Tor control socket is reachable and readable")
    )]
    TorControl(String),

    #[error("Installation failed: {0}")]
    #[diagnostic(code(tails_server::install::failed))]
    Install(String),

    #[error("Persistence error: {0}")]
    #[diagnostic(code(tails_server::persistence::error))]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(tails_server::config::validation),
        help("Check the services list in tails-server.yaml")
    )]
    Validation(String),

    #[error("Timeout waiting for {0}")]
    #[diagnostic(code(tails_server::timeout))]
    Timeout(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true for precondition violations and environmental
    /// unavailability. These are surfaced to the user as-is and never force
    /// the service into the error status.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::NotInstalled(_)
                | Error::AlreadyInstalled(_)
                | Error::AlreadyEnabled(_)
                | Error::TorIsNotRunning
                | Error::UnknownOption { .. }
                | Error::InvalidOptionValue { .. }
        )
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::NotInstalled(name) => {
                Some(format!("Install it first with: tails-server install {}", name))
            }
            Error::AlreadyInstalled(name) => Some(format!(
                "Enable it with: tails-server enable {}",
                name
            )),
            Error::AlreadyEnabled(name) => Some(format!(
                "Check its address with: tails-server info {}",
                name
            )),
            Error::TorIsNotRunning => Some(
                "Tor has not finished bootstrapping yet. Wait for the network connection and try again."
                    .to_string(),
            ),
            Error::ServiceNotFound(_) => {
                Some("List the known services with: tails-server status".to_string())
            }
            Error::ServiceStartFailed(_, _) | Error::Supervisor(_) => Some(
                "See 'systemctl status <unit>' and 'journalctl -xn' for details".to_string(),
            ),
            Error::TorControl(_) => Some(
                "Check tor_control_socket / tor_control_port in tails-server.yaml".to_string(),
            ),
            Error::Config(_) | Error::Validation(_) => {
                Some("Validate your config with: tails-server validate".to_string())
            }
            Error::Persistence(msg) if msg.contains("another instance") => Some(
                "Only one tails-server instance may manage services at a time".to_string(),
            ),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(hint) => format!("{}\n\nHint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
