//! varsync Runtime - agents on top of the bus
//!
//! This crate wires the lower layers into running agents:
//! - `ProviderAgent`: announces definitions, answers reads, applies writes,
//!   broadcasts its full state on a timer
//! - `ConsumerAgent`: snapshots on demand, merges broadcasts into a
//!   replica, notifies observers, writes with client-side checks
//! - `RegistryClient`: provider directory queries
//! - Value sources, configuration and logging setup

pub mod config;
pub mod consumer;
pub mod logging;
pub mod provider;
pub mod registry;
pub mod source;

pub use config::*;
pub use consumer::*;
pub use logging::init_tracing;
pub use provider::*;
pub use registry::*;
pub use source::*;
