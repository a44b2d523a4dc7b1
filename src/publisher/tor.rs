use super::{service_id, HiddenServicePublisher, OnionKey, OnionService};
use crate::config::{Config, TorControlEndpoint, DEFAULT_TOR_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::supervisor::ProcessSupervisor;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stem_rs::controller::Controller;
use tracing::{debug, info};

/// Reply text of `GETINFO onions/detached` when nothing is detached.
const NO_ONION_SERVICES: &str = "No onion services of the specified type";
/// Reply text of `DEL_ONION` for an id Tor does not know.
const UNKNOWN_ONION_SERVICE: &str = "Unknown Onion Service";

/// Publishes onion services through Tor's control port.
///
/// Every call opens its own authenticated controller. Services are created
/// with `Flags=Detach` so they outlive it.
pub struct TorControlPublisher {
    endpoint: TorControlEndpoint,
    password: Option<String>,
    supervisor: Arc<dyn ProcessSupervisor>,
    bootstrapped_target: String,
    poll_interval: Duration,
}

impl TorControlPublisher {
    pub fn new(
        endpoint: TorControlEndpoint,
        password: Option<String>,
        supervisor: Arc<dyn ProcessSupervisor>,
        bootstrapped_target: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            password,
            supervisor,
            bootstrapped_target: bootstrapped_target.into(),
            poll_interval: DEFAULT_TOR_POLL_INTERVAL,
        }
    }

    pub fn from_config(config: &Config, supervisor: Arc<dyn ProcessSupervisor>) -> Result<Self> {
        let mut publisher = Self::new(
            config.tor_control(),
            config.tor_control_password.clone(),
            supervisor,
            config.tor_bootstrapped_target.clone(),
        );
        publisher.poll_interval = config.timings()?.tor_poll_interval;
        Ok(publisher)
    }

    async fn connect(&self) -> Result<Controller> {
        let mut controller = match &self.endpoint {
            TorControlEndpoint::Socket(path) => Controller::from_socket_file(path.as_path())
                .await
                .map_err(|e| {
                    Error::TorControl(format!("Cannot connect to {}: {}", path.display(), e))
                })?,
            TorControlEndpoint::Port(port) => {
                let addr = SocketAddr::from(([127, 0, 0, 1], *port));
                Controller::from_port(addr).await.map_err(|e| {
                    Error::TorControl(format!("Cannot connect to {}: {}", addr, e))
                })?
            }
        };

        controller
            .authenticate(self.password.as_deref())
            .await
            .map_err(|e| Error::TorControl(format!("Authentication failed: {}", e)))?;
        Ok(controller)
    }

    async fn detached_services(controller: &mut Controller) -> Result<Vec<String>> {
        match controller.get_info("onions/detached").await {
            Ok(value) => Ok(parse_detached(&value)),
            Err(e) if e.to_string().contains(NO_ONION_SERVICES) => Ok(Vec::new()),
            Err(e) => Err(Error::TorControl(format!(
                "GETINFO onions/detached failed: {}",
                e
            ))),
        }
    }
}

fn add_onion_command(virtual_port: u16, target_port: u16, key: Option<&OnionKey>) -> String {
    let (key_arg, flags) = match key {
        Some(key) => (key.as_str(), "Detach,DiscardPK"),
        None => ("NEW:ED25519-V3", "Detach"),
    };
    format!(
        "ADD_ONION {} Flags={} Port={},127.0.0.1:{}",
        key_arg, flags, virtual_port, target_port
    )
}

/// `KEY=value` pairs of a reply, with any `250-`/`250 ` status prefix removed.
fn reply_values<'a>(reply: &'a str, key: &str) -> impl Iterator<Item = &'a str> + 'a {
    let prefix = format!("{}=", key);
    reply.lines().filter_map(move |line| {
        let line = line.trim();
        let line = line
            .strip_prefix("250-")
            .or_else(|| line.strip_prefix("250 "))
            .unwrap_or(line);
        line.strip_prefix(prefix.as_str())
    })
}

fn parse_add_onion(reply: &str, key: Option<&OnionKey>) -> Result<OnionService> {
    let id = reply_values(reply, "ServiceID")
        .next()
        .ok_or_else(|| Error::Publisher("ADD_ONION reply has no ServiceID".to_string()))?;
    let private_key = match (reply_values(reply, "PrivateKey").next(), key) {
        (Some(returned), _) => OnionKey::new(returned),
        (None, Some(given)) => given.clone(),
        (None, None) => {
            return Err(Error::Publisher(
                "ADD_ONION reply has no PrivateKey".to_string(),
            ))
        }
    };
    Ok(OnionService {
        address: format!("{}.onion", id),
        private_key,
    })
}

/// Service ids in a `GETINFO onions/detached` value, one per line.
fn parse_detached(value: &str) -> Vec<String> {
    value
        .lines()
        .map(|line| {
            let line = line.trim();
            line.strip_prefix("onions/detached=").unwrap_or(line)
        })
        .filter(|id| !id.is_empty() && *id != "." && *id != "OK")
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl HiddenServicePublisher for TorControlPublisher {
    async fn create_ephemeral_service(
        &self,
        virtual_port: u16,
        target_port: u16,
        key: Option<&OnionKey>,
    ) -> Result<OnionService> {
        let mut controller = self.connect().await?;
        let reply = controller
            .msg(&add_onion_command(virtual_port, target_port, key))
            .await
            .map_err(|e| Error::Publisher(format!("ADD_ONION failed: {}", e)))?;
        let service = parse_add_onion(&reply, key)?;
        info!(address = %service.address, "Created onion service");

        // Polling stands in for HS_DESC upload events; the caller bounds it
        let id = service_id(&service.address).to_string();
        while !Self::detached_services(&mut controller).await?.contains(&id) {
            debug!(address = %service.address, "Waiting for publication");
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(service)
    }

    async fn remove_ephemeral_service(&self, address: &str) -> Result<()> {
        let mut controller = self.connect().await?;
        match controller
            .msg(&format!("DEL_ONION {}", service_id(address)))
            .await
        {
            Ok(_) => {
                info!(address = %address, "Removed onion service");
                Ok(())
            }
            Err(e) if e.to_string().contains(UNKNOWN_ONION_SERVICE) => {
                debug!(address = %address, "Onion service was already gone");
                Ok(())
            }
            Err(e) => Err(Error::Publisher(format!("DEL_ONION failed: {}", e))),
        }
    }

    async fn is_published(&self, address: &str) -> Result<bool> {
        let mut controller = self.connect().await?;
        let id = service_id(address);
        Ok(Self::detached_services(&mut controller)
            .await?
            .iter()
            .any(|published| published == id))
    }

    async fn tor_has_bootstrapped(&self) -> Result<bool> {
        self.supervisor.is_active(&self.bootstrapped_target).await
    }
}
