#![allow(unused_assignments)]

//! # Tails Server
//!
//! Installs self-hosted services, runs them under systemd and publishes
//! each one as a Tor onion service.
//!
//! ## Features
//!
//! - **Lifecycle**: install, enable, disable and uninstall, serialized per
//!   service
//! - **Status**: five independent substates reconciled into a single
//!   user-facing status on every change
//! - **Event dispatch**: systemd unit states mapped onto the substates, with
//!   stale and duplicate events dropped
//! - **Options**: typed per-service options, applied with a restart
//! - **Stable addresses**: onion keys persisted so re-enabling keeps the
//!   address
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tails_server::status::ChannelListener;
//! use tails_server::{Parser, ServiceRegistry};
//!
//! # async fn example() -> Result<(), tails_server::Error> {
//! let config = Parser::new().load_config("tails-server.yaml")?;
//! let (listener, mut events) = ChannelListener::new();
//! let registry = ServiceRegistry::from_config(&config, Arc::new(listener))?;
//!
//! registry.guess_statuses().await?;
//! let enabling = registry.get("mumble")?.spawn_enable();
//! while let Some(event) = events.recv().await {
//!     println!("{}: {}", event.service, event.status);
//!     if enabling.is_finished() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - Lifecycle operations of one service hold its async guard for their
//!   whole duration and never interleave
//! - Status reads and dispatched events only take the substate store's
//!   short synchronous lock, so they never wait on a slow operation
//! - Listeners are called inside that lock, in the order substates changed

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod lock_order;
pub mod persistence;
pub mod publisher;
pub mod registry;
pub mod service;
pub mod status;
pub mod supervisor;

// Re-export commonly used types
pub use config::{Config, Parser, ServiceDescriptor};
pub use dispatcher::{EventDispatcher, EventSource, UnitWatcher};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleDeps, OptionChange, ServiceLifecycle};
pub use registry::{ServiceReport, ServiceRegistry};
pub use service::Service;
pub use status::{Status, StatusListener, SubstateStore};
