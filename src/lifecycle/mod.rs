//! Install, enable, disable and uninstall one service.
//!
//! Every operation holds the service's [`ConcurrencyGuard`] for its whole
//! duration. Substates the operation drives go through
//! [`SubstateStore::transition`]; values it merely observes from the outside
//! world go through [`SubstateStore::set`].

mod guard;
mod worker;

pub use guard::{ConcurrencyGuard, TransitionPermit};

use crate::config::{ServiceDescriptor, Timings};
use crate::error::{Error, Result};
use crate::persistence::{InstalledStore, KeyStore, OptionStore, StateDir};
use crate::publisher::HiddenServicePublisher;
use crate::service::{OptionCleanup, OptionValue, PackageInstaller, Service, ServiceOption};
use crate::status::{
    InstallationState, PublicationState, ServiceState, Snapshot, Status, StatusListener,
    Substate, SubstateStore, SwitchIntent, TorState,
};
use crate::supervisor::ProcessSupervisor;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn, Instrument};

/// One pending option edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionChange {
    Set(String, OptionValue),
    /// Forget the stored value so the default applies again.
    Reset(String),
}

impl OptionChange {
    pub fn option(&self) -> &str {
        match self {
            OptionChange::Set(name, _) | OptionChange::Reset(name) => name,
        }
    }
}

/// Collaborators shared by every lifecycle.
#[derive(Clone)]
pub struct LifecycleDeps {
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub publisher: Arc<dyn HiddenServicePublisher>,
    pub installed: Arc<dyn InstalledStore>,
    pub installer: Arc<dyn PackageInstaller>,
    pub cleanup: Arc<dyn OptionCleanup>,
    pub state: StateDir,
    /// Fired whenever the Tor bootstrapped target is observed active.
    pub tor_ready: Arc<Notify>,
    pub timings: Timings,
}

pub struct ServiceLifecycle {
    service: Service,
    store: SubstateStore,
    guard: ConcurrencyGuard,
    deps: LifecycleDeps,
}

impl ServiceLifecycle {
    pub fn new(
        descriptor: ServiceDescriptor,
        deps: LifecycleDeps,
        listener: Arc<dyn StatusListener>,
    ) -> Self {
        let name = descriptor.name.clone();
        let service = Service::new(
            descriptor,
            OptionStore::new(deps.state.clone()),
            KeyStore::new(deps.state.clone()),
        );
        Self {
            service,
            store: SubstateStore::new(name.clone(), listener),
            guard: ConcurrencyGuard::new(name),
            deps,
        }
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn store(&self) -> &SubstateStore {
        &self.store
    }

    pub fn status(&self) -> Status {
        self.store.status()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// True while a lifecycle operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    pub fn is_installed(&self) -> Result<bool> {
        self.deps.installed.is_installed(self.name())
    }

    /// Install the service's software and mark it installed.
    ///
    /// Waits for Tor to bootstrap first, polling every `tor_poll_interval`
    /// and waking early when the dispatcher reports Tor running.
    pub async fn install(&self) -> Result<()> {
        let _permit = self.guard.acquire("install").await;
        self.install_impl()
            .instrument(tracing::info_span!("install", service.name = %self.name()))
            .await
    }

    /// Caller holds the permit.
    pub(crate) async fn install_impl(&self) -> Result<()> {
        if self.is_installed()? {
            return Err(Error::AlreadyInstalled(self.name().to_string()));
        }

        self.wait_for_tor().await?;

        info!("Installing");
        self.store
            .set(Substate::Installation(InstallationState::Uninstalled));
        self.store
            .transition(Substate::Installation(InstallationState::Installing))?;
        let result = match self.deps.installer.install(self.service.descriptor()).await {
            Ok(()) => self.deps.installed.set_installed(self.name(), true),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.store
                .transition(Substate::Installation(InstallationState::Uninstalled))?;
            return Err(e);
        }

        self.store
            .transition(Substate::Installation(InstallationState::Installed))?;
        info!("Installed");
        Ok(())
    }

    /// Start the process and publish its onion service, in the order the
    /// service's policy asks for.
    pub async fn enable(&self) -> Result<()> {
        let _permit = self.guard.acquire("enable").await;
        self.enable_impl()
            .instrument(tracing::info_span!("enable", service.name = %self.name()))
            .await
    }

    /// Caller holds the permit.
    pub(crate) async fn enable_impl(&self) -> Result<()> {
        if !self.is_installed()? {
            return Err(Error::NotInstalled(self.name().to_string()));
        }
        if !self.refresh_tor().await? {
            return Err(Error::TorIsNotRunning);
        }

        let running = self.observe_running().await?;
        let published = self.observe_published().await?;
        if running && published {
            return Err(Error::AlreadyEnabled(self.name().to_string()));
        }
        self.bring_up().await
    }

    /// Stop the process and remove the onion service. A no-op when both are
    /// already down.
    pub async fn disable(&self) -> Result<()> {
        let _permit = self.guard.acquire("disable").await;
        self.disable_impl()
            .instrument(tracing::info_span!("disable", service.name = %self.name()))
            .await
    }

    /// Caller holds the permit.
    pub(crate) async fn disable_impl(&self) -> Result<()> {
        let _stop = self.store.begin_user_stop();
        self.store.set(Substate::Switch(SwitchIntent::Inactive));
        self.take_down().await
    }

    /// Disable if needed, run option cleanup, forget all stored state.
    pub async fn uninstall(&self) -> Result<()> {
        let _permit = self.guard.acquire("uninstall").await;
        self.uninstall_impl()
            .instrument(tracing::info_span!("uninstall", service.name = %self.name()))
            .await
    }

    /// Caller holds the permit.
    pub(crate) async fn uninstall_impl(&self) -> Result<()> {
        if !self.is_installed()? {
            return Err(Error::NotInstalled(self.name().to_string()));
        }

        info!("Uninstalling");
        self.store
            .set(Substate::Installation(InstallationState::Installed));
        self.store
            .transition(Substate::Installation(InstallationState::Uninstalling))?;
        if let Err(e) = self.remove_everything().await {
            self.store
                .transition(Substate::Installation(InstallationState::Installed))?;
            return Err(e);
        }
        self.store
            .transition(Substate::Installation(InstallationState::Uninstalled))?;
        info!("Uninstalled");
        Ok(())
    }

    async fn remove_everything(&self) -> Result<()> {
        let _stop = self.store.begin_user_stop();
        self.store.set(Substate::Switch(SwitchIntent::Inactive));
        self.take_down().await?;

        let stored = self.service.option_store().load(self.name())?;
        for (option, value) in self.service.option_values()? {
            if stored.contains_key(option.name()) {
                self.deps
                    .cleanup
                    .clean_up(self.name(), &option, &value)
                    .await?;
            }
        }

        self.service.option_store().clear(self.name())?;
        self.service.key_store().remove(self.name())?;
        self.deps.state.remove_service(self.name())?;
        self.deps.installed.set_installed(self.name(), false)
    }

    /// Current value of one option.
    pub fn get_option(&self, name: &str) -> Result<(ServiceOption, OptionValue)> {
        if !self.is_installed()? {
            return Err(Error::NotInstalled(self.name().to_string()));
        }
        let option = self.service.option(name)?.clone();
        let value = self.service.option_value(name)?;
        Ok((option, value))
    }

    /// Parse `raw` for the option's kind and apply it.
    pub async fn set_option(&self, name: &str, raw: &str) -> Result<()> {
        if !self.is_installed()? {
            return Err(Error::NotInstalled(self.name().to_string()));
        }
        let value = self.service.option(name)?.parse_value(raw)?;
        self.apply_options(vec![OptionChange::Set(name.to_string(), value)])
            .await
    }

    /// Forget the stored value, falling back to the default.
    pub async fn reset_option(&self, name: &str) -> Result<()> {
        self.apply_options(vec![OptionChange::Reset(name.to_string())])
            .await
    }

    /// Store option changes. A running service is taken down first and
    /// brought back up afterwards so the new values take effect.
    pub async fn apply_options(&self, changes: Vec<OptionChange>) -> Result<()> {
        let _permit = self.guard.acquire("apply_options").await;
        self.apply_options_impl(changes)
            .instrument(tracing::info_span!("apply_options", service.name = %self.name()))
            .await
    }

    /// Caller holds the permit.
    pub(crate) async fn apply_options_impl(&self, changes: Vec<OptionChange>) -> Result<()> {
        if !self.is_installed()? {
            return Err(Error::NotInstalled(self.name().to_string()));
        }
        for change in &changes {
            let option = self.service.option(change.option())?;
            if let OptionChange::Set(_, value) = change {
                if !option.accepts(value) {
                    return Err(Error::InvalidOptionValue {
                        option: option.name().to_string(),
                        reason: format!("'{}' has the wrong kind", value),
                    });
                }
            }
        }

        let running = self.observe_running().await?;
        if !running {
            return self.store_options(&changes);
        }
        if !self.refresh_tor().await? {
            return Err(Error::TorIsNotRunning);
        }

        info!("Restarting to apply option changes");
        let _stop = self.store.begin_user_stop();
        self.take_down().await?;
        self.store_options(&changes)?;
        self.bring_up().await
    }

    fn store_options(&self, changes: &[OptionChange]) -> Result<()> {
        let options = self.service.option_store();
        for change in changes {
            match change {
                OptionChange::Set(name, value) => {
                    debug!(option = %name, "Storing option");
                    options.set(self.name(), name, value.clone())?;
                }
                OptionChange::Reset(name) => {
                    debug!(option = %name, "Resetting option");
                    options.remove(self.name(), name)?;
                }
            }
        }
        Ok(())
    }

    /// Seed every substate from the outside world and publish the result.
    pub async fn guess_status(&self) -> Result<Status> {
        let _permit = self.guard.acquire("guess_status").await;
        let installed = self.is_installed()?;
        let tor = self
            .supervised("Tor bootstrap check", self.deps.publisher.tor_has_bootstrapped())
            .await?;
        let running = installed
            && self
                .supervised("is-active", self.deps.supervisor.is_active(self.service.unit()))
                .await?;
        let published = installed && tor && self.query_published().await?;

        let snapshot = Snapshot {
            installation: if installed {
                InstallationState::Installed
            } else {
                InstallationState::Uninstalled
            },
            service: if running {
                ServiceState::Running
            } else {
                ServiceState::Stopped
            },
            tor: if tor {
                TorState::Running
            } else {
                TorState::NotRunning
            },
            publication: if published {
                PublicationState::Online
            } else {
                PublicationState::Offline
            },
            switch: if running {
                SwitchIntent::Active
            } else {
                SwitchIntent::Inactive
            },
            user_stop_in_flight: false,
            forced: None,
        };
        let status = self.store.seed(snapshot);
        debug!(service = %self.name(), %status, "Guessed initial status");
        Ok(status)
    }

    /// Publish a service whose process runs without its onion service.
    pub async fn make_states_consistent(&self) -> Result<()> {
        let _permit = self.guard.acquire("make_states_consistent").await;
        self.make_states_consistent_impl().await
    }

    pub(crate) async fn make_states_consistent_impl(&self) -> Result<()> {
        if !self.is_installed()? {
            return Ok(());
        }
        let snapshot = self.store.snapshot();
        if snapshot.tor == TorState::Running
            && snapshot.service == ServiceState::Running
            && snapshot.publication == PublicationState::Offline
        {
            info!(service = %self.name(), "Running but not published, publishing");
            self.store.set(Substate::Switch(SwitchIntent::Active));
            self.publish().await?;
        }
        Ok(())
    }

    async fn bring_up(&self) -> Result<()> {
        if self.service.publish_before_starting() {
            self.publish().await?;
            if let Err(e) = self.start().await {
                warn!("Process failed to start, removing its onion service");
                self.withdraw_after_failure().await;
                return Err(e);
            }
        } else {
            self.start().await?;
            self.publish().await?;
        }

        if !self.observe_running().await? {
            warn!("Process stopped right after starting, removing its onion service");
            self.withdraw_after_failure().await;
            return Err(Error::ServiceStartFailed(
                self.name().to_string(),
                "stopped right after it was started".to_string(),
            ));
        }
        info!("Enabled");
        Ok(())
    }

    async fn take_down(&self) -> Result<()> {
        let running = self.observe_running().await?;
        let published = self.observe_published().await?;
        if !running && !published {
            debug!("Already disabled");
            return Ok(());
        }

        if running {
            self.stop().await?;
        }
        if published {
            self.unpublish().await?;
        }
        info!("Disabled");
        Ok(())
    }

    /// The switch flips to active together with the first sign of life, so a
    /// stopped service is never reported as unexpectedly stopped before it
    /// was even asked to start.
    async fn start(&self) -> Result<()> {
        if self.store.snapshot().service == ServiceState::Running {
            self.store.set(Substate::Switch(SwitchIntent::Active));
            return Ok(());
        }
        info!(unit = %self.service.unit(), "Starting");
        self.store
            .transition(Substate::Service(ServiceState::Starting))?;
        self.store.set(Substate::Switch(SwitchIntent::Active));
        match self
            .supervised("start", self.deps.supervisor.start(self.service.unit()))
            .await
        {
            Ok(()) => {
                self.store
                    .transition(Substate::Service(ServiceState::Running))?;
                Ok(())
            }
            Err(e) => {
                self.store.set(Substate::Service(ServiceState::Stopped));
                Err(e)
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        info!(unit = %self.service.unit(), "Stopping");
        self.store
            .transition(Substate::Service(ServiceState::Stopping))?;
        match self
            .supervised("stop", self.deps.supervisor.stop(self.service.unit()))
            .await
        {
            Ok(()) => {
                self.store.set(Substate::Service(ServiceState::Stopped));
                Ok(())
            }
            Err(e) => {
                self.store.set(Substate::Service(ServiceState::Running));
                Err(e)
            }
        }
    }

    async fn publish(&self) -> Result<()> {
        let snapshot = self.store.snapshot();
        if snapshot.publication == PublicationState::Online {
            return Ok(());
        }
        if !self.service.publish_before_starting() && snapshot.service != ServiceState::Running
        {
            return Err(Error::Publisher(format!(
                "refusing to publish '{}' while its process is not running",
                self.name()
            )));
        }

        self.store
            .transition(Substate::Publication(PublicationState::Publishing))?;
        let created = self.create_onion().await;
        match created {
            Ok(address) => {
                self.store
                    .transition(Substate::Publication(PublicationState::Online))?;
                info!(%address, "Onion service published");
                Ok(())
            }
            Err(e) => {
                self.store
                    .set(Substate::Publication(PublicationState::Offline));
                Err(e)
            }
        }
    }

    async fn create_onion(&self) -> Result<String> {
        let key = self.service.key_store().load(self.name())?;
        let virtual_port = self.service.virtual_port()?;
        let target_port = self.service.target_port()?;
        let onion = self
            .published(
                "onion service publication",
                self.deps.publisher.create_ephemeral_service(
                    virtual_port,
                    target_port,
                    key.as_ref().map(|k| &k.private_key),
                ),
            )
            .await?;
        self.service.key_store().save(self.name(), &onion)?;
        Ok(onion.address)
    }

    async fn unpublish(&self) -> Result<()> {
        if let Some(address) = self.service.address()? {
            info!(%address, "Removing onion service");
            self.published(
                "onion service removal",
                self.deps.publisher.remove_ephemeral_service(&address),
            )
            .await?;
        }
        self.store
            .transition(Substate::Publication(PublicationState::Offline))?;
        Ok(())
    }

    /// Best effort: the original failure is what gets reported.
    async fn withdraw_after_failure(&self) {
        if let Err(e) = self.unpublish().await {
            warn!(error = %e, "Failed to remove onion service of a failed process");
        }
    }

    async fn wait_for_tor(&self) -> Result<()> {
        loop {
            let notified = self.deps.tor_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.refresh_tor().await? {
                return Ok(());
            }
            info!("Waiting for Tor to bootstrap");
            tokio::select! {
                _ = &mut notified => debug!("Woken by Tor target event"),
                _ = tokio::time::sleep(self.deps.timings.tor_poll_interval) => {}
            }
        }
    }

    /// Ask whether Tor bootstrapped and record the answer.
    async fn refresh_tor(&self) -> Result<bool> {
        let bootstrapped = self
            .supervised("Tor bootstrap check", self.deps.publisher.tor_has_bootstrapped())
            .await?;
        self.store.set(Substate::Tor(if bootstrapped {
            TorState::Running
        } else {
            TorState::NotRunning
        }));
        Ok(bootstrapped)
    }

    /// Ask the supervisor whether the unit runs and resync a stale substate.
    async fn observe_running(&self) -> Result<bool> {
        let running = self
            .supervised("is-active", self.deps.supervisor.is_active(self.service.unit()))
            .await?;
        let current = self.store.snapshot().service;
        if running && current != ServiceState::Running {
            self.store.set(Substate::Service(ServiceState::Running));
        } else if !running
            && !matches!(
                current,
                ServiceState::Stopped | ServiceState::StoppedUnexpectedly
            )
        {
            self.store.set(Substate::Service(ServiceState::Stopped));
        }
        Ok(running)
    }

    async fn observe_published(&self) -> Result<bool> {
        let published = self.query_published().await?;
        self.store.set(Substate::Publication(if published {
            PublicationState::Online
        } else {
            PublicationState::Offline
        }));
        Ok(published)
    }

    /// Without a reachable Tor the stored publication substate is the best
    /// answer available.
    async fn query_published(&self) -> Result<bool> {
        let Some(address) = self.service.address()? else {
            return Ok(false);
        };
        match self
            .published(
                "onion service lookup",
                self.deps.publisher.is_published(&address),
            )
            .await
        {
            Ok(published) => Ok(published),
            Err(e) => {
                warn!(error = %e, "Could not ask Tor about the onion service");
                Ok(self.store.snapshot().publication != PublicationState::Offline)
            }
        }
    }

    async fn supervised<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        bounded(self.deps.timings.supervisor_timeout, what, self.name(), call).await
    }

    async fn published<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        bounded(self.deps.timings.publish_timeout, what, self.name(), call).await
    }
}

async fn bounded<T>(
    limit: std::time::Duration,
    what: &str,
    service: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(Error::Timeout(format!("{} of '{}'", what, service))),
    }
}
