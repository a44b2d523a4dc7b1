use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Installation dimension of a service.
///
/// ```text
/// Uninstalled ──► Installing ──► Installed ──► Uninstalling ──► Uninstalled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallationState {
    Uninstalled,
    Installing,
    Installed,
    Uninstalling,
}

/// Process dimension of a service, as reported by the process supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    StoppedUnexpectedly,
}

/// Whether the anonymity network has bootstrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TorState {
    NotRunning,
    Running,
}

/// Publication dimension of the service's onion address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublicationState {
    Offline,
    Publishing,
    Online,
}

/// Last state the user asked for with the on/off switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchIntent {
    Active,
    Inactive,
}

/// Names one of the independently tracked substate fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubstateCategory {
    Installation,
    Service,
    Tor,
    Publication,
    Switch,
}

impl SubstateCategory {
    pub const ALL: [SubstateCategory; 5] = [
        SubstateCategory::Installation,
        SubstateCategory::Service,
        SubstateCategory::Tor,
        SubstateCategory::Publication,
        SubstateCategory::Switch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SubstateCategory::Installation => "installation",
            SubstateCategory::Service => "service",
            SubstateCategory::Tor => "tor",
            SubstateCategory::Publication => "publication",
            SubstateCategory::Switch => "switch",
        }
    }
}

impl fmt::Display for SubstateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value for exactly one substate field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Substate {
    Installation(InstallationState),
    Service(ServiceState),
    Tor(TorState),
    Publication(PublicationState),
    Switch(SwitchIntent),
}

impl Substate {
    pub fn category(&self) -> SubstateCategory {
        match self {
            Substate::Installation(_) => SubstateCategory::Installation,
            Substate::Service(_) => SubstateCategory::Service,
            Substate::Tor(_) => SubstateCategory::Tor,
            Substate::Publication(_) => SubstateCategory::Publication,
            Substate::Switch(_) => SubstateCategory::Switch,
        }
    }

    /// Parse a textual substate value for the given category.
    ///
    /// Fails with [`Error::InvalidSubstate`] when the value is not part of the
    /// category's enum.
    ///
    /// # Examples
    ///
    /// ```
    /// use tails_server::status::{Substate, SubstateCategory, ServiceState};
    ///
    /// let parsed = Substate::parse(SubstateCategory::Service, "running").unwrap();
    /// assert_eq!(parsed, Substate::Service(ServiceState::Running));
    /// assert!(Substate::parse(SubstateCategory::Tor, "online").is_err());
    /// ```
    pub fn parse(category: SubstateCategory, value: &str) -> Result<Self> {
        let invalid = || Error::InvalidSubstate {
            category: category.name().to_string(),
            value: value.to_string(),
        };
        let parsed = match category {
            SubstateCategory::Installation => Substate::Installation(match value {
                "uninstalled" => InstallationState::Uninstalled,
                "installing" => InstallationState::Installing,
                "installed" => InstallationState::Installed,
                "uninstalling" => InstallationState::Uninstalling,
                _ => return Err(invalid()),
            }),
            SubstateCategory::Service => Substate::Service(match value {
                "stopped" => ServiceState::Stopped,
                "starting" => ServiceState::Starting,
                "running" => ServiceState::Running,
                "stopping" => ServiceState::Stopping,
                "stopped-unexpectedly" => ServiceState::StoppedUnexpectedly,
                _ => return Err(invalid()),
            }),
            SubstateCategory::Tor => Substate::Tor(match value {
                "not-running" => TorState::NotRunning,
                "running" => TorState::Running,
                _ => return Err(invalid()),
            }),
            SubstateCategory::Publication => Substate::Publication(match value {
                "offline" => PublicationState::Offline,
                "publishing" => PublicationState::Publishing,
                "online" => PublicationState::Online,
                _ => return Err(invalid()),
            }),
            SubstateCategory::Switch => Substate::Switch(match value {
                "active" => SwitchIntent::Active,
                "inactive" => SwitchIntent::Inactive,
                _ => return Err(invalid()),
            }),
        };
        Ok(parsed)
    }

    /// Check whether a lifecycle-driven write from `self` to `to` respects the
    /// transitional states. Observed writes (supervisor events) skip this check.
    ///
    /// Valid lifecycle transitions:
    /// ```text
    /// installation: Uninstalled ─► Installing ─► Installed ─► Uninstalling ─► Uninstalled
    ///               (Installing ─► Uninstalled and Uninstalling ─► Installed roll back)
    /// service:      Stopped ─► Starting ─► Running ─► Stopping ─► Stopped
    ///               (Starting ─► Stopped when the process never came up)
    /// publication:  Offline ─► Publishing ─► Online ─► Offline
    ///               (Publishing ─► Offline when publication failed)
    /// tor, switch:  any
    /// ```
    pub fn is_valid_transition(&self, to: &Substate) -> bool {
        use InstallationState as I;
        use PublicationState as P;
        use ServiceState as S;

        match (self, to) {
            (a, b) if a == b => true,
            (Substate::Installation(from), Substate::Installation(to)) => matches!(
                (from, to),
                (I::Uninstalled, I::Installing)
                    | (I::Installing, I::Installed)
                    | (I::Installing, I::Uninstalled)
                    | (I::Installed, I::Uninstalling)
                    | (I::Uninstalling, I::Uninstalled)
                    | (I::Uninstalling, I::Installed)
            ),
            (Substate::Service(from), Substate::Service(to)) => matches!(
                (from, to),
                (S::Stopped | S::StoppedUnexpectedly, S::Starting)
                    | (S::Starting, S::Running)
                    | (S::Starting, S::Stopped)
                    | (S::Running, S::Stopping)
                    | (S::Stopping, S::Stopped)
            ),
            (Substate::Publication(from), Substate::Publication(to)) => matches!(
                (from, to),
                (P::Offline, P::Publishing)
                    | (P::Publishing, P::Online)
                    | (P::Publishing, P::Offline)
                    | (P::Online, P::Offline)
            ),
            (Substate::Tor(_), Substate::Tor(_)) => true,
            (Substate::Switch(_), Substate::Switch(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Substate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Substate::Installation(s) => match s {
                InstallationState::Uninstalled => "uninstalled",
                InstallationState::Installing => "installing",
                InstallationState::Installed => "installed",
                InstallationState::Uninstalling => "uninstalling",
            },
            Substate::Service(s) => match s {
                ServiceState::Stopped => "stopped",
                ServiceState::Starting => "starting",
                ServiceState::Running => "running",
                ServiceState::Stopping => "stopping",
                ServiceState::StoppedUnexpectedly => "stopped-unexpectedly",
            },
            Substate::Tor(s) => match s {
                TorState::NotRunning => "not-running",
                TorState::Running => "running",
            },
            Substate::Publication(s) => match s {
                PublicationState::Offline => "offline",
                PublicationState::Publishing => "publishing",
                PublicationState::Online => "online",
            },
            Substate::Switch(s) => match s {
                SwitchIntent::Active => "active",
                SwitchIntent::Inactive => "inactive",
            },
        };
        f.write_str(value)
    }
}

/// Authoritative, user-visible status of a service.
///
/// Derived from the substates on every change; only [`Status::Error`] and
/// [`Status::Invalid`] are ever injected directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Installing,
    Installed,
    Uninstalling,
    Uninstalled,
    Starting,
    Running,
    Stopping,
    Stopped,
    StoppedUnexpectedly,
    Publishing,
    Online,
    Offline,
    TorNotRunning,
    TorRunning,
    Error,
    Invalid,
}

impl Status {
    /// Text shown to the user for this status.
    pub fn label(&self) -> &'static str {
        match self {
            Status::Installing => "Installing",
            Status::Installed => "Installed",
            Status::Uninstalling => "Uninstalling",
            Status::Uninstalled => "Not installed",
            Status::Starting => "Starting",
            Status::Running => "Running",
            Status::Stopping => "Stopping",
            Status::Stopped => "Stopped",
            Status::StoppedUnexpectedly => "Stopped unexpectedly",
            Status::Publishing => "Announcing onion address",
            Status::Online => "Online",
            Status::Offline => "Offline",
            Status::TorNotRunning => "Tor is not running",
            Status::TorRunning => "Tor is running",
            Status::Error => "An error occurred. See the log for details.",
            Status::Invalid => "The service is in an invalid state. See the log for details.",
        }
    }

    /// True for statuses that describe an operation still in progress.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Status::Installing
                | Status::Uninstalling
                | Status::Starting
                | Status::Stopping
                | Status::Publishing
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<InstallationState> for Status {
    fn from(state: InstallationState) -> Self {
        match state {
            InstallationState::Uninstalled => Status::Uninstalled,
            InstallationState::Installing => Status::Installing,
            InstallationState::Installed => Status::Installed,
            InstallationState::Uninstalling => Status::Uninstalling,
        }
    }
}

impl From<ServiceState> for Status {
    fn from(state: ServiceState) -> Self {
        match state {
            ServiceState::Stopped => Status::Stopped,
            ServiceState::Starting => Status::Starting,
            ServiceState::Running => Status::Running,
            ServiceState::Stopping => Status::Stopping,
            ServiceState::StoppedUnexpectedly => Status::StoppedUnexpectedly,
        }
    }
}

impl From<TorState> for Status {
    fn from(state: TorState) -> Self {
        match state {
            TorState::NotRunning => Status::TorNotRunning,
            TorState::Running => Status::TorRunning,
        }
    }
}

impl From<PublicationState> for Status {
    fn from(state: PublicationState) -> Self {
        match state {
            PublicationState::Offline => Status::Offline,
            PublicationState::Publishing => Status::Publishing,
            PublicationState::Online => Status::Online,
        }
    }
}

/// Out-of-band status injected by failure handlers. Bypasses the substate
/// priority chain until the next substate change supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusOverride {
    Error,
    Invalid,
}

impl From<StatusOverride> for Status {
    fn from(forced: StatusOverride) -> Self {
        match forced {
            StatusOverride::Error => Status::Error,
            StatusOverride::Invalid => Status::Invalid,
        }
    }
}

/// Immutable copy of everything the reconciler reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub installation: InstallationState,
    pub service: ServiceState,
    pub tor: TorState,
    pub publication: PublicationState,
    pub switch: SwitchIntent,
    /// A user-initiated stop (disable or restart) is currently running.
    pub user_stop_in_flight: bool,
    pub forced: Option<StatusOverride>,
}

impl Snapshot {
    pub fn get(&self, category: SubstateCategory) -> Substate {
        match category {
            SubstateCategory::Installation => Substate::Installation(self.installation),
            SubstateCategory::Service => Substate::Service(self.service),
            SubstateCategory::Tor => Substate::Tor(self.tor),
            SubstateCategory::Publication => Substate::Publication(self.publication),
            SubstateCategory::Switch => Substate::Switch(self.switch),
        }
    }

    /// Write one field, returning the value it replaced.
    pub(crate) fn replace(&mut self, value: Substate) -> Substate {
        let previous = self.get(value.category());
        match value {
            Substate::Installation(s) => self.installation = s,
            Substate::Service(s) => self.service = s,
            Substate::Tor(s) => self.tor = s,
            Substate::Publication(s) => self.publication = s,
            Substate::Switch(s) => self.switch = s,
        }
        previous
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            installation: InstallationState::Uninstalled,
            service: ServiceState::Stopped,
            tor: TorState::NotRunning,
            publication: PublicationState::Offline,
            switch: SwitchIntent::Inactive,
            user_stop_in_flight: false,
            forced: None,
        }
    }
}
