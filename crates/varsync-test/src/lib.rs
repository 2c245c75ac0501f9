//! varsync Test Harness - Registry stub and end-to-end validation
//!
//! This crate provides:
//! - An in-process registry answering on a `MemoryBus`
//! - End-to-end tests of provider, consumer and registry together
//! - Criterion benchmarks for the wire codec and state merge

pub mod integration;
pub mod registry_stub;

pub use registry_stub::*;
