use super::reconciler::reconcile;
use super::types::{Snapshot, Status, StatusOverride, Substate, SubstateCategory};
use crate::error::{Error, Result};
use crate::lock_order::{LockId, Tracked};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// One authoritative status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub service: String,
    pub status: Status,
    pub at: DateTime<Utc>,
}

/// Receives every authoritative status change.
///
/// Called with the service's substate lock held so that events for one
/// service arrive in the order the substates changed. Implementations must be
/// quick and must not call back into the store.
pub trait StatusListener: Send + Sync {
    fn on_status_changed(&self, service: &str, status: Status);

    /// Every individual substate change, before the status is recomputed.
    fn on_substate_changed(&self, _service: &str, _previous: Substate, _current: Substate) {}
}

/// Hands status changes to a consumer task over an unbounded channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusListener for ChannelListener {
    fn on_status_changed(&self, service: &str, status: Status) {
        let event = StatusEvent {
            service: service.to_string(),
            status,
            at: Utc::now(),
        };
        // Receiver gone means nobody is presenting anymore
        if self.tx.send(event).is_err() {
            debug!(service = %service, "Status receiver dropped");
        }
    }
}

/// Discards all status changes.
pub struct NullListener;

impl StatusListener for NullListener {
    fn on_status_changed(&self, _service: &str, _status: Status) {}
}

struct Inner {
    snapshot: Snapshot,
    status: Status,
}

/// The substates of one service plus the last status published for them.
///
/// Every write reconciles inside the same critical section and notifies the
/// listener only when the authoritative status actually changed.
pub struct SubstateStore {
    service: String,
    inner: Mutex<Inner>,
    listener: Arc<dyn StatusListener>,
}

impl SubstateStore {
    pub fn new(service: impl Into<String>, listener: Arc<dyn StatusListener>) -> Self {
        let snapshot = Snapshot::default();
        Self {
            service: service.into(),
            inner: Mutex::new(Inner {
                status: reconcile(&snapshot),
                snapshot,
            }),
            listener,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn snapshot(&self) -> Snapshot {
        self.with_inner(|inner| inner.snapshot)
    }

    /// Last reconciled status.
    pub fn status(&self) -> Status {
        self.with_inner(|inner| inner.status)
    }

    /// Write an observed value and return the one it replaced.
    ///
    /// No ordering check: external sources (the supervisor, the Tor target)
    /// enforce their own ordering and may jump straight to a final state.
    pub fn set(&self, value: Substate) -> Substate {
        self.update(|snapshot| {
            let previous = snapshot.replace(value);
            if previous != value {
                snapshot.forced = None;
            }
            Ok(previous)
        })
        .unwrap_or(value)
    }

    /// Write a value on behalf of a lifecycle operation.
    ///
    /// Fails with [`Error::InvalidTransition`] if the move skips a
    /// transitional state.
    pub fn transition(&self, value: Substate) -> Result<Substate> {
        self.update(|snapshot| {
            let current = snapshot.get(value.category());
            if !current.is_valid_transition(&value) {
                return Err(Error::InvalidTransition {
                    category: value.category().to_string(),
                    from: current.to_string(),
                    to: value.to_string(),
                });
            }
            snapshot.replace(value);
            if current != value {
                snapshot.forced = None;
            }
            Ok(current)
        })
    }

    /// Write an observed value and force a status in the same step, so the
    /// listener sees a single change.
    pub fn set_forcing(&self, value: Substate, forced: StatusOverride) -> Substate {
        self.update(|snapshot| {
            let previous = snapshot.replace(value);
            snapshot.forced = Some(forced);
            Ok(previous)
        })
        .unwrap_or(value)
    }

    /// Inject `Error` or `Invalid`, bypassing the priority chain until the
    /// next substate change.
    pub fn force(&self, forced: StatusOverride) {
        let _ = self.update(|snapshot| {
            snapshot.forced = Some(forced);
            Ok(())
        });
    }

    /// Replace every substate at once and publish the resulting status, even
    /// if it did not change.
    pub fn seed(&self, seeded: Snapshot) -> Status {
        let _order = Tracked::acquire(LockId::Substates);
        let mut inner = self.inner.lock();
        inner.snapshot = seeded;
        inner.status = reconcile(&inner.snapshot);
        self.listener.on_status_changed(&self.service, inner.status);
        inner.status
    }

    /// Mark a user-requested stop as in flight until the returned guard drops.
    pub fn begin_user_stop(&self) -> UserStop<'_> {
        self.set_user_stop(true);
        UserStop { store: self }
    }

    fn set_user_stop(&self, in_flight: bool) {
        let _ = self.update(|snapshot| {
            snapshot.user_stop_in_flight = in_flight;
            Ok(())
        });
    }

    fn with_inner<T>(&self, read: impl FnOnce(&Inner) -> T) -> T {
        let _order = Tracked::acquire(LockId::Substates);
        let inner = self.inner.lock();
        read(&inner)
    }

    fn update<T>(&self, mutate: impl FnOnce(&mut Snapshot) -> Result<T>) -> Result<T> {
        let _order = Tracked::acquire(LockId::Substates);
        let mut inner = self.inner.lock();

        let before = inner.snapshot;
        let mut next = before;
        let out = mutate(&mut next)?;
        if next == before {
            debug!(service = %self.service, "Substates unchanged, not reconciling");
            return Ok(out);
        }
        inner.snapshot = next;
        for category in SubstateCategory::ALL {
            let (previous, current) = (before.get(category), next.get(category));
            if previous != current {
                debug!(service = %self.service, %category, %previous, %current, "Substate changed");
                self.listener
                    .on_substate_changed(&self.service, previous, current);
            }
        }

        let status = reconcile(&next);
        if status != inner.status {
            debug!(
                service = %self.service,
                from = ?inner.status,
                to = ?status,
                "Status changed"
            );
            inner.status = status;
            self.listener.on_status_changed(&self.service, status);
        }
        Ok(out)
    }
}

/// Clears the user-stop flag on drop.
pub struct UserStop<'a> {
    store: &'a SubstateStore,
}

impl Drop for UserStop<'_> {
    fn drop(&mut self) {
        self.store.set_user_stop(false);
    }
}
