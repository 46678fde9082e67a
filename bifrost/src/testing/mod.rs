//! Module with testing utility functions.

#![allow(clippy::unwrap_in_result, clippy::unwrap_used, clippy::expect_used)]

pub mod chain;
pub mod context;
pub mod ledger;
pub mod tss;

use crate::config::Settings;

/// The path for the configuration file that we should use during testing.
pub const DEFAULT_CONFIG_PATH: Option<&str> = Some("./src/config/default");

impl Settings {
    /// Create a new `Settings` instance from the default configuration file.
    /// This is useful for testing.
    pub fn new_from_default_config() -> Result<Self, config::ConfigError> {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

/// Clears all bridge-specific configuration environment variables. This is
/// needed for a number of tests which use the `Settings` struct due to the
/// fact that `cargo test` runs tests in threads, and environment variables
/// are per-process.
pub fn clear_env() {
    for var in std::env::vars() {
        if var.0.starts_with("BIFROST_") {
            std::env::remove_var(var.0);
        }
    }
}
