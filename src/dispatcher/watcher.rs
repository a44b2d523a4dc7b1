use super::{DispatchHandle, EventDispatcher, EventSource, UnitEvent};
use crate::error::{Error, Result};
use crate::supervisor::{ProcessSupervisor, UnitState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polls the state of every watched unit and forwards it.
///
/// Stands in for a D-Bus subscription. Every successful poll sends the
/// current state; the dispatcher drops the ones its stores already hold.
/// A failed query ends the source's subscription and the next successful
/// one starts a new epoch, so anything still queued from before the gap
/// is dropped.
pub struct UnitWatcher {
    supervisor: Arc<dyn ProcessSupervisor>,
    dispatcher: Arc<EventDispatcher>,
    handle: DispatchHandle,
    tor_target: String,
    interval: Duration,
    query_timeout: Duration,
    subscriptions: HashMap<EventSource, u64>,
}

impl UnitWatcher {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        dispatcher: Arc<EventDispatcher>,
        handle: DispatchHandle,
        tor_target: impl Into<String>,
        interval: Duration,
        query_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            dispatcher,
            handle,
            tor_target: tor_target.into(),
            interval,
            query_timeout,
            subscriptions: HashMap::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(interval = ?self.interval, "Watching units");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Unit watcher cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            self.poll_once().await?;
        }
    }

    /// Query every source once and forward each state read. Returns how
    /// many events were sent.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let mut sent = 0;
        for source in self.dispatcher.sources() {
            let unit = match &source {
                EventSource::Unit(unit) => unit.clone(),
                EventSource::TorTarget => self.tor_target.clone(),
            };
            let state = match self.query(&unit).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(%unit, error = %e, "Failed to query unit state");
                    self.subscriptions.remove(&source);
                    continue;
                }
            };

            let dispatcher = &self.dispatcher;
            let epoch = *self
                .subscriptions
                .entry(source.clone())
                .or_insert_with(|| dispatcher.subscribe(&source));
            self.handle.send(UnitEvent {
                source,
                epoch,
                state,
            })?;
            sent += 1;
        }
        Ok(sent)
    }

    async fn query(&self, unit: &str) -> Result<UnitState> {
        match tokio::time::timeout(self.query_timeout, self.supervisor.unit_state(unit)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Error::Timeout(format!("state of unit {}", unit))),
        }
    }
}
