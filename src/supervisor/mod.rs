//! Process supervisor seam.
//!
//! The lifecycle only ever starts, stops and queries units through
//! [`ProcessSupervisor`]. [`SystemctlSupervisor`] is the systemd-backed
//! implementation.

mod systemctl;

pub use systemctl::SystemctlSupervisor;

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Raw `(ActiveState, SubState)` pair of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitState {
    pub active_state: String,
    pub sub_state: String,
}

impl UnitState {
    pub fn new(active_state: impl Into<String>, sub_state: impl Into<String>) -> Self {
        Self {
            active_state: active_state.into(),
            sub_state: sub_state.into(),
        }
    }
}

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn start(&self, unit: &str) -> Result<()>;

    async fn stop(&self, unit: &str) -> Result<()>;

    async fn is_active(&self, unit: &str) -> Result<bool>;

    async fn unit_state(&self, unit: &str) -> Result<UnitState>;
}
