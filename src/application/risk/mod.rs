//! Risk admission module.
//!
//! Provides the stateless gate consulted before any order-placing action.

pub mod gate;

pub use gate::{evaluate, GateCheck, GateContext, GateDecision};
