//! Routes supervisor state changes into the substate stores.
//!
//! Two kinds of source feed the dispatcher: each service's own unit and the
//! global Tor bootstrapped target. Events carry the epoch of the
//! subscription that produced them; anything older than the source's
//! current epoch is dropped, and an event that would not change the stored
//! substate is dropped too.

mod watcher;

pub use watcher::UnitWatcher;

use crate::error::{Error, Result};
use crate::lifecycle::ServiceLifecycle;
use crate::lock_order::{LockId, Tracked};
use crate::status::{ServiceState, StatusOverride, Substate, TorState};
use crate::supervisor::UnitState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventSource {
    /// A service's systemd unit.
    Unit(String),
    /// The target that becomes active once Tor has bootstrapped.
    TorTarget,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Unit(unit) => f.write_str(unit),
            EventSource::TorTarget => f.write_str("tor-bootstrapped"),
        }
    }
}

/// One observed `(ActiveState, SubState)` pair, tagged with the epoch of
/// the subscription that saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitEvent {
    pub source: EventSource,
    pub epoch: u64,
    pub state: UnitState,
}

/// What a unit's state means for the service substate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitReading {
    State(ServiceState),
    Failed,
}

/// Map a unit's systemd state to the service substate.
///
/// Units generated from SysV scripts set RemainAfterExit, so `active` with
/// sub-state `exited` counts as running just like `running` does.
pub fn read_unit_state(active_state: &str, sub_state: &str) -> Result<UnitReading> {
    if sub_state == "running" {
        return Ok(UnitReading::State(ServiceState::Running));
    }
    match active_state {
        "activating" => Ok(UnitReading::State(ServiceState::Starting)),
        "active" | "reloading" => Ok(UnitReading::State(ServiceState::Running)),
        "deactivating" => Ok(UnitReading::State(ServiceState::Stopping)),
        "inactive" => Ok(UnitReading::State(ServiceState::Stopped)),
        "failed" => Ok(UnitReading::Failed),
        other => Err(Error::InvalidSubstate {
            category: "service".to_string(),
            value: other.to_string(),
        }),
    }
}

/// Only an active target means Tor has bootstrapped.
pub fn read_tor_state(active_state: &str) -> TorState {
    match active_state {
        "active" => TorState::Running,
        _ => TorState::NotRunning,
    }
}

pub struct EventDispatcher {
    lifecycles: Vec<Arc<ServiceLifecycle>>,
    epochs: Mutex<HashMap<EventSource, u64>>,
    tor_ready: Arc<Notify>,
}

impl EventDispatcher {
    pub fn new(lifecycles: Vec<Arc<ServiceLifecycle>>, tor_ready: Arc<Notify>) -> Self {
        Self {
            lifecycles,
            epochs: Mutex::new(HashMap::new()),
            tor_ready,
        }
    }

    /// The Tor target followed by every distinct service unit.
    pub fn sources(&self) -> Vec<EventSource> {
        let mut sources = vec![EventSource::TorTarget];
        for lifecycle in &self.lifecycles {
            let source = EventSource::Unit(lifecycle.service().unit().to_string());
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        sources
    }

    /// Start a new subscription on `source`. Events tagged with any earlier
    /// epoch are ignored from now on.
    pub fn subscribe(&self, source: &EventSource) -> u64 {
        let _order = Tracked::acquire(LockId::Epochs);
        let mut epochs = self.epochs.lock();
        let epoch = epochs.entry(source.clone()).or_insert(0);
        *epoch += 1;
        debug!(%source, epoch = *epoch, "Subscribed");
        *epoch
    }

    pub fn epoch(&self, source: &EventSource) -> u64 {
        let _order = Tracked::acquire(LockId::Epochs);
        self.epochs.lock().get(source).copied().unwrap_or(0)
    }

    /// Entry point for untagged events, treated as current.
    pub fn notify(
        &self,
        source: &EventSource,
        active_state: &str,
        sub_state: &str,
    ) -> Result<()> {
        let event = UnitEvent {
            source: source.clone(),
            epoch: self.epoch(source),
            state: UnitState::new(active_state, sub_state),
        };
        self.dispatch(&event)
    }

    pub fn dispatch(&self, event: &UnitEvent) -> Result<()> {
        let current = self.epoch(&event.source);
        if event.epoch < current {
            warn!(
                source = %event.source,
                epoch = event.epoch,
                current,
                "Dropping event from an old subscription"
            );
            return Ok(());
        }
        debug!(
            source = %event.source,
            active_state = %event.state.active_state,
            sub_state = %event.state.sub_state,
            "Unit event"
        );
        match &event.source {
            EventSource::TorTarget => {
                self.on_tor_event(&event.state);
                Ok(())
            }
            EventSource::Unit(unit) => self.on_unit_event(unit, &event.state),
        }
    }

    fn on_tor_event(&self, state: &UnitState) {
        let tor = read_tor_state(&state.active_state);
        if tor == TorState::Running {
            self.tor_ready.notify_waiters();
        }
        for lifecycle in &self.lifecycles {
            let store = lifecycle.store();
            if store.snapshot().tor == tor {
                continue;
            }
            store.set(Substate::Tor(tor));
        }
    }

    fn on_unit_event(&self, unit: &str, state: &UnitState) -> Result<()> {
        let reading = read_unit_state(&state.active_state, &state.sub_state)?;
        let mut matched = false;
        for lifecycle in self
            .lifecycles
            .iter()
            .filter(|l| l.service().unit() == unit)
        {
            matched = true;
            let store = lifecycle.store();
            let snapshot = store.snapshot();
            match reading {
                UnitReading::Failed => {
                    error!(
                        service = %lifecycle.name(),
                        "systemd unit {} failed. See 'systemctl status {}' and 'journalctl -xn' for details",
                        unit,
                        unit
                    );
                    let reported = is_stopped(snapshot.service)
                        && snapshot.forced == Some(StatusOverride::Error);
                    if reported {
                        continue;
                    }
                    store.set_forcing(
                        Substate::Service(ServiceState::Stopped),
                        StatusOverride::Error,
                    );
                }
                UnitReading::State(service) => {
                    let duplicate = snapshot.service == service
                        || (is_stopped(snapshot.service) && is_stopped(service));
                    if duplicate {
                        debug!(service = %lifecycle.name(), ?service, "Unchanged, ignoring");
                        continue;
                    }
                    store.set(Substate::Service(service));
                }
            }
        }
        if !matched {
            debug!(%unit, "Event for a unit no service uses");
        }
        Ok(())
    }

    /// Process queued events on a dedicated task until cancelled or every
    /// handle is dropped.
    pub fn start(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> (DispatchHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Event dispatcher cancelled");
                        break;
                    }
                    message = rx.recv() => message,
                };
                match message {
                    Some(Message::Event(event)) => {
                        if let Err(e) = dispatcher.dispatch(&event) {
                            warn!(source = %event.source, error = %e, "Ignoring event");
                        }
                    }
                    Some(Message::Barrier(done)) => {
                        let _ = done.send(());
                    }
                    None => break,
                }
            }
        });
        (DispatchHandle { tx }, task)
    }
}

fn is_stopped(state: ServiceState) -> bool {
    matches!(state, ServiceState::Stopped | ServiceState::StoppedUnexpectedly)
}

enum Message {
    Event(UnitEvent),
    Barrier(oneshot::Sender<()>),
}

/// Feeds events to a running dispatcher task.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl DispatchHandle {
    pub fn send(&self, event: UnitEvent) -> Result<()> {
        self.tx
            .send(Message::Event(event))
            .map_err(|_| Error::Supervisor("event dispatcher has stopped".to_string()))
    }

    /// Wait until every event sent before this call has been dispatched.
    pub async fn sync(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.tx
            .send(Message::Barrier(done))
            .map_err(|_| Error::Supervisor("event dispatcher has stopped".to_string()))?;
        wait.await
            .map_err(|_| Error::Supervisor("event dispatcher has stopped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_sub_state_wins() {
        assert_eq!(
            read_unit_state("deactivating", "running").unwrap(),
            UnitReading::State(ServiceState::Running)
        );
    }

    #[test]
    fn test_remain_after_exit_counts_as_running() {
        assert_eq!(
            read_unit_state("active", "exited").unwrap(),
            UnitReading::State(ServiceState::Running)
        );
    }

    #[test]
    fn test_unit_state_mapping() {
        assert_eq!(
            read_unit_state("activating", "start").unwrap(),
            UnitReading::State(ServiceState::Starting)
        );
        assert_eq!(
            read_unit_state("deactivating", "stop-sigterm").unwrap(),
            UnitReading::State(ServiceState::Stopping)
        );
        assert_eq!(
            read_unit_state("inactive", "dead").unwrap(),
            UnitReading::State(ServiceState::Stopped)
        );
        assert_eq!(
            read_unit_state("failed", "failed").unwrap(),
            UnitReading::Failed
        );
    }

    #[test]
    fn test_unknown_active_state_is_rejected() {
        let err = read_unit_state("maintenance", "dead").unwrap_err();
        assert!(matches!(err, Error::InvalidSubstate { .. }));
    }

    #[test]
    fn test_tor_state_mapping() {
        assert_eq!(read_tor_state("active"), TorState::Running);
        assert_eq!(read_tor_state("inactive"), TorState::NotRunning);
        assert_eq!(read_tor_state("activating"), TorState::NotRunning);
    }

    #[test]
    fn test_subscribe_bumps_epoch() {
        let dispatcher = EventDispatcher::new(Vec::new(), Arc::new(Notify::new()));
        let source = EventSource::Unit("sshd.service".into());
        assert_eq!(dispatcher.epoch(&source), 0);
        assert_eq!(dispatcher.subscribe(&source), 1);
        assert_eq!(dispatcher.subscribe(&source), 2);
        assert_eq!(dispatcher.epoch(&EventSource::TorTarget), 0);
    }

    #[tokio::test]
    async fn test_tor_event_wakes_waiters() {
        let notify = Arc::new(Notify::new());
        let dispatcher = EventDispatcher::new(Vec::new(), Arc::clone(&notify));
        let waiter = {
            let notify = Arc::clone(&notify);
            tokio::spawn(async move { notify.notified().await })
        };
        tokio::task::yield_now().await;
        // keep firing until the waiter has registered
        while !waiter.is_finished() {
            dispatcher
                .notify(&EventSource::TorTarget, "active", "active")
                .unwrap();
            tokio::task::yield_now().await;
        }
        waiter.await.unwrap();
    }
}
