//! varsync Core - Fundamental types and primitives
//!
//! This crate defines the core types shared by providers and consumers:
//! - Identifiers (ProviderId, VariableId)
//! - Time primitives (Timestamp)
//! - Variable definitions, values and states
//! - The bus subject namespace
//! - The error taxonomy

pub mod id;
pub mod time;
pub mod variable;
pub mod subject;
pub mod error;

pub use id::*;
pub use time::*;
pub use variable::*;
pub use subject::{SubjectKind, LOCATION_PREFIX, VERSION_PREFIX};
pub use error::*;
