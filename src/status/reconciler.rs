//! Collapses the independent substates into one authoritative [`Status`].
//!
//! Priority, highest first:
//!
//! ```text
//! forced Error/Invalid
//!   └─ tor != Running            -> TorNotRunning
//!       └─ installation != Installed -> installation
//!           └─ service != Running    -> service (Stopped may become StoppedUnexpectedly)
//!               └─ publication
//! ```
//!
//! Tor gates everything, installation gates runtime and runtime gates
//! publication.

use super::types::{
    InstallationState, ServiceState, Snapshot, Status, SwitchIntent, TorState,
};

/// Compute the authoritative status for a snapshot. Pure.
pub fn reconcile(snapshot: &Snapshot) -> Status {
    if let Some(forced) = snapshot.forced {
        return forced.into();
    }

    if snapshot.tor != TorState::Running {
        return Status::TorNotRunning;
    }

    if snapshot.installation != InstallationState::Installed {
        return snapshot.installation.into();
    }

    match snapshot.service {
        ServiceState::Running => snapshot.publication.into(),
        ServiceState::Stopped | ServiceState::StoppedUnexpectedly => {
            if stopped_unexpectedly(snapshot) {
                Status::StoppedUnexpectedly
            } else {
                Status::Stopped
            }
        }
        other => other.into(),
    }
}

/// The process is down although the user wants it up and nobody asked it to stop.
fn stopped_unexpectedly(snapshot: &Snapshot) -> bool {
    snapshot.switch == SwitchIntent::Active && !snapshot.user_stop_in_flight
}
