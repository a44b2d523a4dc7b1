//! Maps authoritative statuses to what a front end draws next to a service.

use super::types::Status;
use crate::error::{Error, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Spinner,
    ErrorIcon,
    Off,
    On,
}

/// Indicator for a status.
///
/// `Installed`, `Running`, `TorRunning` and `Invalid` are never rendered on
/// their own and fail with [`Error::InvalidStatus`].
pub fn indicator(status: Status) -> Result<Indicator> {
    match status {
        Status::Starting
        | Status::Stopping
        | Status::Installing
        | Status::Uninstalled
        | Status::Uninstalling
        | Status::Publishing => Ok(Indicator::Spinner),
        Status::Error | Status::TorNotRunning | Status::StoppedUnexpectedly => {
            Ok(Indicator::ErrorIcon)
        }
        Status::Offline | Status::Stopped => Ok(Indicator::Off),
        Status::Online => Ok(Indicator::On),
        Status::Installed | Status::Running | Status::TorRunning | Status::Invalid => {
            Err(Error::InvalidStatus(format!("{:?}", status)))
        }
    }
}

/// One-word label used in compact listings.
pub fn short_label(status: Status) -> Result<&'static str> {
    Ok(match indicator(status)? {
        Indicator::Spinner => "...",
        Indicator::ErrorIcon => "Error",
        Indicator::Off => "Off",
        Indicator::On => "On",
    })
}
