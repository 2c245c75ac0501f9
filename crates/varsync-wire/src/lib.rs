//! varsync Wire Format - Tagged binary payloads
//!
//! This crate implements the payloads exchanged over the bus:
//! - Message envelope (version + kind)
//! - Tagged scalar values
//! - Variable batches
//! - Definition sets and their fingerprint
//! - Queries, responses, events and commands

pub mod cursor;
pub mod value;
pub mod batch;
pub mod definition;
pub mod message;

pub use cursor::*;
pub use value::*;
pub use batch::*;
pub use definition::*;
pub use message::*;
