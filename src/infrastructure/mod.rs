//! Infrastructure layer.
//!
//! Technical concerns that support the application without containing
//! trading logic: configuration, logging, startup checks and wiring.
//!
//! # Submodules
//!
//! - [`bootstrap`] - Composition root for runtime wiring
//! - [`config`] - Configuration loading and validation
//! - [`health`] - Startup health checks

pub mod bootstrap;
pub mod config;
pub mod health;
