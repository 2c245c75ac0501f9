//! varsync State - authoritative and replicated variable state
//!
//! - `LiveStateMap`: the provider's states, batch building, write application
//! - `Replica`: the consumer's read-only copy, batch merge

pub mod live;
pub mod replica;

pub use live::*;
pub use replica::*;
