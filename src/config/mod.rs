//! Relay Configuration Module
//!
//! Site identity, daily schedule, form wiring and probe tuning loaded from a
//! TOML file.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `SPEED_RELAY_CONFIG` environment variable (path to TOML file)
//! 3. `relay_config.toml` in the current working directory
//! 4. Built-in defaults (site identity empty, so startup validation fails)
//!
//! The loaded `RelayConfig` is read-only for the life of the process and is
//! handed to components by reference.

mod relay_config;
pub mod defaults;
pub mod validation;

pub use relay_config::*;
