//! varsync Transport Layer
//!
//! This crate provides:
//! - The `Transport`/`Connector` seam to a NATS-style message bus
//! - `MemoryBus`, an in-process bus with subject wildcards and request/reply
//! - Credential providers (OAuth client credentials, static tokens)

pub mod auth;
pub mod bus;
pub mod memory;

pub use auth::{CredentialProvider, OAuthClient, OAuthCredentials, StaticToken};
pub use bus::*;
pub use memory::{MemoryBus, MemoryClient};
