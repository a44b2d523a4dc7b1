//! Configuration parsing and types.
//!
//! - `types` - root [`Config`], Tor control endpoint and [`Timings`]
//! - `service` - [`ServiceDescriptor`]
//! - `duration` - "5s"-style durations
//! - `parser` - locating and loading `tails-server.yaml`
//! - `validation` - config validation

mod duration;
mod parser;
mod service;
mod types;
mod validation;

pub use duration::*;
pub use parser::*;
pub use service::*;
pub use types::*;
