//! Hidden-service publisher seam.

mod tor;

pub use tor::TorControlPublisher;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Private key material of an onion service in Tor's `TYPE:BLOB` form,
/// e.g. `ED25519-V3:base64...`.
#[derive(Clone, PartialEq, Eq)]
pub struct OnionKey(String);

impl OnionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OnionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log key material
        f.write_str("OnionKey(..)")
    }
}

/// A created onion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionService {
    /// Full hostname including the `.onion` suffix.
    pub address: String,
    pub private_key: OnionKey,
}

/// Strip the `.onion` suffix, leaving Tor's service id.
pub fn service_id(address: &str) -> &str {
    address.strip_suffix(".onion").unwrap_or(address)
}

#[async_trait]
pub trait HiddenServicePublisher: Send + Sync {
    /// Create an ephemeral onion service forwarding `virtual_port` to the
    /// local `target_port`. Reuses `key` when given so the address stays
    /// stable. Returns once the service is published.
    async fn create_ephemeral_service(
        &self,
        virtual_port: u16,
        target_port: u16,
        key: Option<&OnionKey>,
    ) -> Result<OnionService>;

    async fn remove_ephemeral_service(&self, address: &str) -> Result<()>;

    async fn is_published(&self, address: &str) -> Result<bool>;

    async fn tor_has_bootstrapped(&self) -> Result<bool>;
}
