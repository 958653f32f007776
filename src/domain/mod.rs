//! Domain layer - Core types and port definitions
//!
//! This module defines the core traits (ports) that cluster adapters and
//! scheduler drivers implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
