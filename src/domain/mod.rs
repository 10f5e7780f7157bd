//! Domain layer - Core value types and port definitions
//!
//! This module defines the cycle-scoped usage figures, the decision records,
//! and the traits (ports) that appliance adapters implement, following
//! hexagonal architecture principles.

pub mod decision;
pub mod ports;

pub use decision::*;
pub use ports::*;
