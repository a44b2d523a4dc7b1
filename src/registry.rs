//! Every configured service, built once from the config.

use crate::config::{Config, Timings};
use crate::dispatcher::{DispatchHandle, EventDispatcher, UnitWatcher};
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleDeps, ServiceLifecycle};
use crate::persistence::{StateDir, YamlInstalledStore};
use crate::publisher::TorControlPublisher;
use crate::service::{CommandInstaller, LogCleanup};
use crate::status::{Status, StatusListener};
use crate::supervisor::{ProcessSupervisor, SystemctlSupervisor};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One row of `tails-server status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub name: String,
    pub description: Option<String>,
    pub unit: String,
    pub status: Status,
    pub label: String,
    pub installed: bool,
    pub address: Option<String>,
    pub virtual_port: u16,
    pub target_port: u16,
}

pub struct ServiceRegistry {
    lifecycles: Vec<Arc<ServiceLifecycle>>,
    dispatcher: Arc<EventDispatcher>,
    deps: LifecycleDeps,
    tor_target: String,
}

impl ServiceRegistry {
    /// Build a registry with explicit collaborators.
    pub fn new(
        config: &Config,
        deps: LifecycleDeps,
        listener: Arc<dyn StatusListener>,
    ) -> Self {
        let lifecycles: Vec<_> = config
            .services
            .iter()
            .map(|descriptor| {
                Arc::new(ServiceLifecycle::new(
                    descriptor.clone(),
                    deps.clone(),
                    Arc::clone(&listener),
                ))
            })
            .collect();
        let dispatcher = Arc::new(EventDispatcher::new(
            lifecycles.clone(),
            Arc::clone(&deps.tor_ready),
        ));
        debug!(services = lifecycles.len(), "Service registry built");
        Self {
            lifecycles,
            dispatcher,
            deps,
            tor_target: config.tor_bootstrapped_target.clone(),
        }
    }

    /// Build a registry backed by systemd, the Tor control port and the
    /// configured state directory.
    pub fn from_config(config: &Config, listener: Arc<dyn StatusListener>) -> Result<Self> {
        let timings = config.timings()?;
        let state = StateDir::new(&config.state_dir);
        let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(SystemctlSupervisor::new());
        let publisher = TorControlPublisher::from_config(config, Arc::clone(&supervisor))?;
        let deps = LifecycleDeps {
            supervisor,
            publisher: Arc::new(publisher),
            installed: Arc::new(YamlInstalledStore::new(state.installed_file())),
            installer: Arc::new(CommandInstaller),
            cleanup: Arc::new(LogCleanup),
            state,
            tor_ready: Arc::new(Notify::new()),
            timings,
        };
        Ok(Self::new(config, deps, listener))
    }

    pub fn services(&self) -> &[Arc<ServiceLifecycle>] {
        &self.lifecycles
    }

    pub fn get(&self, name: &str) -> Result<&Arc<ServiceLifecycle>> {
        self.lifecycles
            .iter()
            .find(|l| l.name() == name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn timings(&self) -> Timings {
        self.deps.timings
    }

    pub fn state_dir(&self) -> &StateDir {
        &self.deps.state
    }

    /// Seed every service's status from the outside world, all services
    /// at once.
    pub async fn guess_statuses(&self) -> Result<()> {
        let guesses = join_all(self.lifecycles.iter().map(|l| l.guess_status())).await;
        let mut errors = Vec::new();
        for (lifecycle, guess) in self.lifecycles.iter().zip(guesses) {
            if let Err(e) = guess {
                warn!(service = %lifecycle.name(), error = %e, "Failed to guess status");
                errors.push(e);
            }
        }
        collect(errors)
    }

    /// Publish every service that runs without its onion service.
    pub async fn make_states_consistent(&self) -> Result<()> {
        let mut errors = Vec::new();
        for lifecycle in &self.lifecycles {
            if let Err(e) = lifecycle.repair_states().await {
                errors.push(e);
            }
        }
        collect(errors)
    }

    /// Enable every installed service whose `autostart` option is on and
    /// that is not already up.
    pub fn autostart(&self) -> Result<Vec<(String, JoinHandle<Result<()>>)>> {
        let mut started = Vec::new();
        for lifecycle in &self.lifecycles {
            if !lifecycle.is_installed()? || !lifecycle.service().autostart()? {
                continue;
            }
            if lifecycle.status() == Status::Online {
                continue;
            }
            info!(service = %lifecycle.name(), "Autostarting");
            started.push((lifecycle.name().to_string(), lifecycle.spawn_enable()));
        }
        Ok(started)
    }

    pub fn status_report(&self) -> Result<Vec<ServiceReport>> {
        self.lifecycles
            .iter()
            .map(|lifecycle| {
                let service = lifecycle.service();
                let status = lifecycle.status();
                Ok(ServiceReport {
                    name: service.name().to_string(),
                    description: service.descriptor().description.clone(),
                    unit: service.unit().to_string(),
                    status,
                    label: status.label().to_string(),
                    installed: lifecycle.is_installed()?,
                    address: service.address()?,
                    virtual_port: service.virtual_port()?,
                    target_port: service.target_port()?,
                })
            })
            .collect()
    }

    /// A poller feeding this registry's dispatcher through `handle`.
    pub fn watcher(&self, handle: DispatchHandle) -> UnitWatcher {
        UnitWatcher::new(
            Arc::clone(&self.deps.supervisor),
            Arc::clone(&self.dispatcher),
            handle,
            self.tor_target.clone(),
            self.deps.timings.watch_interval,
            self.deps.timings.supervisor_timeout,
        )
    }
}

fn collect(mut errors: Vec<Error>) -> Result<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(Error::Multiple(errors)),
    }
}
