//! In-memory supervisor, publisher and listener shared by the integration
//! tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tails_server::config::{Config, ServiceDescriptor, Timings};
use tails_server::lifecycle::{LifecycleDeps, ServiceLifecycle};
use tails_server::persistence::{InstalledStore, StateDir, YamlInstalledStore};
use tails_server::publisher::{service_id, HiddenServicePublisher, OnionKey, OnionService};
use tails_server::service::{OptionCleanup, OptionValue, PackageInstaller, ServiceOption};
use tails_server::status::{Status, StatusListener, Substate, SubstateCategory};
use tails_server::supervisor::{ProcessSupervisor, UnitState};
use tails_server::{Error, Result, ServiceRegistry};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const TOR_TARGET: &str = "tor-has-bootstrapped.target";

pub fn fast_timings() -> Timings {
    Timings {
        tor_poll_interval: Duration::from_millis(10),
        supervisor_timeout: Duration::from_secs(5),
        publish_timeout: Duration::from_secs(5),
        watch_interval: Duration::from_millis(10),
    }
}

/// A service on `<name>.service` with the usual builtin options.
pub fn descriptor(name: &str, publish_before_starting: bool) -> ServiceDescriptor {
    let yaml = format!(
        r#"
name: {name}
systemd_unit: {name}.service
default_target_port: 6000
publish_before_starting: {publish_before_starting}
options:
  - {{ kind: builtin, name: virtual-port }}
  - {{ kind: builtin, name: autostart }}
  - {{ kind: text, name: server-password, masked: true, default: "" }}
"#
    );
    serde_yaml::from_str(&yaml).expect("test descriptor parses")
}

pub fn unit(name: &str) -> String {
    format!("{}.service", name)
}

// ============================================================================
// Supervisor
// ============================================================================

#[derive(Default)]
struct SupervisorState {
    active: HashSet<String>,
    fail_start: HashSet<String>,
    die_after_start: HashSet<String>,
    failing_queries: HashSet<String>,
    unit_states: HashMap<String, UnitState>,
    starts: HashMap<String, usize>,
    stops: HashMap<String, usize>,
    start_delay: Duration,
}

#[derive(Default)]
pub struct FakeSupervisor {
    state: Mutex<SupervisorState>,
}

impl FakeSupervisor {
    pub fn set_active(&self, unit: &str, active: bool) {
        let mut state = self.state.lock();
        if active {
            state.active.insert(unit.to_string());
        } else {
            state.active.remove(unit);
        }
    }

    pub fn fail_start(&self, unit: &str) {
        self.state.lock().fail_start.insert(unit.to_string());
    }

    /// `start` succeeds but the unit is gone right after.
    pub fn die_after_start(&self, unit: &str) {
        self.state.lock().die_after_start.insert(unit.to_string());
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.state.lock().start_delay = delay;
    }

    pub fn fail_queries(&self, unit: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_queries.insert(unit.to_string());
        } else {
            state.failing_queries.remove(unit);
        }
    }

    /// Report an explicit `(ActiveState, SubState)` for `unit`.
    pub fn set_unit_state(&self, unit: &str, active_state: &str, sub_state: &str) {
        self.state
            .lock()
            .unit_states
            .insert(unit.to_string(), UnitState::new(active_state, sub_state));
    }

    pub fn start_calls(&self, unit: &str) -> usize {
        self.state.lock().starts.get(unit).copied().unwrap_or(0)
    }

    pub fn stop_calls(&self, unit: &str) -> usize {
        self.state.lock().stops.get(unit).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn start(&self, unit: &str) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            *state.starts.entry(unit.to_string()).or_default() += 1;
            if state.fail_start.contains(unit) {
                return Err(Error::ServiceStartFailed(
                    unit.to_string(),
                    "exit code 1".to_string(),
                ));
            }
            state.start_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        if !state.die_after_start.contains(unit) {
            state.active.insert(unit.to_string());
        }
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        let mut state = self.state.lock();
        *state.stops.entry(unit.to_string()).or_default() += 1;
        state.active.remove(unit);
        Ok(())
    }

    async fn is_active(&self, unit: &str) -> Result<bool> {
        Ok(self.state.lock().active.contains(unit))
    }

    async fn unit_state(&self, unit: &str) -> Result<UnitState> {
        let state = self.state.lock();
        if state.failing_queries.contains(unit) {
            return Err(Error::Supervisor(format!("{} is unreachable", unit)));
        }
        if let Some(explicit) = state.unit_states.get(unit) {
            return Ok(explicit.clone());
        }
        Ok(if state.active.contains(unit) {
            UnitState::new("active", "running")
        } else {
            UnitState::new("inactive", "dead")
        })
    }
}

// ============================================================================
// Publisher
// ============================================================================

#[derive(Default)]
struct PublisherState {
    bootstrapped: bool,
    published: HashSet<String>,
    creates: Vec<(u16, u16)>,
    removes: usize,
    fail_create: bool,
    create_delay: Duration,
    next_id: usize,
}

#[derive(Default)]
pub struct FakePublisher {
    state: Mutex<PublisherState>,
}

impl FakePublisher {
    pub fn set_bootstrapped(&self, bootstrapped: bool) {
        self.state.lock().bootstrapped = bootstrapped;
    }

    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.state.lock().create_delay = delay;
    }

    /// Publish `address` behind the lifecycle's back.
    pub fn mark_published(&self, address: &str) {
        self.state.lock().published.insert(address.to_string());
    }

    pub fn is_published_now(&self, address: &str) -> bool {
        self.state.lock().published.contains(address)
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().creates.len()
    }

    /// `(virtual_port, target_port)` of every create call.
    pub fn created_ports(&self) -> Vec<(u16, u16)> {
        self.state.lock().creates.clone()
    }

    pub fn remove_calls(&self) -> usize {
        self.state.lock().removes
    }
}

#[async_trait]
impl HiddenServicePublisher for FakePublisher {
    async fn create_ephemeral_service(
        &self,
        virtual_port: u16,
        target_port: u16,
        key: Option<&OnionKey>,
    ) -> Result<OnionService> {
        let delay = {
            let mut state = self.state.lock();
            state.creates.push((virtual_port, target_port));
            if state.fail_create {
                return Err(Error::Publisher("ADD_ONION refused".to_string()));
            }
            state.create_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        // A reused key keeps its address
        let id = match key.and_then(|k| k.as_str().strip_prefix("ED25519-V3:")) {
            Some(id) => id.to_string(),
            None => {
                state.next_id += 1;
                format!("fake{:052}", state.next_id)
            }
        };
        let address = format!("{}.onion", id);
        state.published.insert(address.clone());
        Ok(OnionService {
            address,
            private_key: OnionKey::new(format!("ED25519-V3:{}", id)),
        })
    }

    async fn remove_ephemeral_service(&self, address: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.removes += 1;
        state.published.remove(address);
        Ok(())
    }

    async fn is_published(&self, address: &str) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.published.contains(address)
            || state.published.contains(service_id(address)))
    }

    async fn tor_has_bootstrapped(&self) -> Result<bool> {
        Ok(self.state.lock().bootstrapped)
    }
}

// ============================================================================
// Installer and option cleanup
// ============================================================================

#[derive(Default)]
pub struct FakeInstaller {
    installs: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl FakeInstaller {
    pub fn fail(&self) {
        *self.fail.lock() = true;
    }

    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().clone()
    }
}

#[async_trait]
impl PackageInstaller for FakeInstaller {
    async fn install(&self, service: &ServiceDescriptor) -> Result<()> {
        self.installs.lock().push(service.name.clone());
        if *self.fail.lock() {
            return Err(Error::Install(format!("apt-get failed for {}", service.name)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCleanup {
    calls: Mutex<Vec<(String, String, OptionValue)>>,
}

impl RecordingCleanup {
    /// `(service, option, value)` per cleaned option.
    pub fn calls(&self) -> Vec<(String, String, OptionValue)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl OptionCleanup for RecordingCleanup {
    async fn clean_up(
        &self,
        service: &str,
        option: &ServiceOption,
        value: &OptionValue,
    ) -> Result<()> {
        self.calls
            .lock()
            .push((service.to_string(), option.name().to_string(), value.clone()));
        Ok(())
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Keeps every status and substate change in order.
#[derive(Default)]
pub struct Recorder {
    statuses: Mutex<Vec<(String, Status)>>,
    substates: Mutex<Vec<(String, Substate)>>,
}

impl Recorder {
    pub fn statuses(&self, service: &str) -> Vec<Status> {
        self.statuses
            .lock()
            .iter()
            .filter(|(s, _)| s == service)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Values one category took, in order.
    pub fn history(&self, service: &str, category: SubstateCategory) -> Vec<Substate> {
        self.substates
            .lock()
            .iter()
            .filter(|(s, value)| s == service && value.category() == category)
            .map(|(_, value)| *value)
            .collect()
    }

    pub fn clear(&self) {
        self.statuses.lock().clear();
        self.substates.lock().clear();
    }
}

impl StatusListener for Recorder {
    fn on_status_changed(&self, service: &str, status: Status) {
        self.statuses.lock().push((service.to_string(), status));
    }

    fn on_substate_changed(&self, service: &str, _previous: Substate, current: Substate) {
        self.substates.lock().push((service.to_string(), current));
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub temp: TempDir,
    pub supervisor: Arc<FakeSupervisor>,
    pub publisher: Arc<FakePublisher>,
    pub installer: Arc<FakeInstaller>,
    pub cleanup: Arc<RecordingCleanup>,
    pub installed: Arc<YamlInstalledStore>,
    pub recorder: Arc<Recorder>,
    pub deps: LifecycleDeps,
}

impl Harness {
    /// Tor already bootstrapped, nothing installed.
    pub fn new() -> Self {
        Self::with_timings(fast_timings())
    }

    pub fn with_timings(timings: Timings) -> Self {
        let temp = TempDir::new().expect("temp dir");
        let state = StateDir::new(temp.path());
        let supervisor = Arc::new(FakeSupervisor::default());
        let publisher = Arc::new(FakePublisher::default());
        publisher.set_bootstrapped(true);
        let installer = Arc::new(FakeInstaller::default());
        let cleanup = Arc::new(RecordingCleanup::default());
        let installed = Arc::new(YamlInstalledStore::new(state.installed_file()));
        let deps = LifecycleDeps {
            supervisor: supervisor.clone(),
            publisher: publisher.clone(),
            installed: installed.clone(),
            installer: installer.clone(),
            cleanup: cleanup.clone(),
            state,
            tor_ready: Arc::new(Notify::new()),
            timings,
        };
        Self {
            temp,
            supervisor,
            publisher,
            installer,
            cleanup,
            installed,
            recorder: Arc::new(Recorder::default()),
            deps,
        }
    }

    pub fn lifecycle(&self, descriptor: ServiceDescriptor) -> Arc<ServiceLifecycle> {
        Arc::new(ServiceLifecycle::new(
            descriptor,
            self.deps.clone(),
            self.recorder.clone(),
        ))
    }

    pub fn mark_installed(&self, service: &str) {
        self.installed
            .set_installed(service, true)
            .expect("mark installed");
    }

    pub fn config(&self, services: Vec<ServiceDescriptor>) -> Config {
        Config {
            state_dir: self.temp.path().to_path_buf(),
            tor_bootstrapped_target: TOR_TARGET.to_string(),
            services,
            ..Config::default()
        }
    }

    pub fn registry(&self, services: Vec<ServiceDescriptor>) -> ServiceRegistry {
        ServiceRegistry::new(&self.config(services), self.deps.clone(), self.recorder.clone())
    }
}
